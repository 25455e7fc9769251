//! Proof claimability
//!
//! Decides which inbound proofs the caller can spend before any swap or mint
//! call is made. Plain secrets are always claimable. A NUT-11 P2PK secret is
//! claimable when it is locked to one of the caller's keys. Malformed secrets
//! and spending conditions we do not evaluate are not.

use cdk_claim_common::nuts::nut10::{self, Kind};
use cdk_claim_common::nuts::nut11::locking_pubkey;
use cdk_claim_common::{Proof, Proofs, PublicKey};

/// Why a proof can not be claimed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnclaimableReason {
    /// Secret looks structured but does not parse
    #[error("Proof has a malformed secret: {0}")]
    MalformedSecret(String),
    /// Locked to a key the caller does not control
    #[error("Proof is locked to a public key you do not control: {0}")]
    WrongKey(String),
    /// Spending condition kind is not supported
    #[error("Proof uses an unsupported spending condition: {0}")]
    UnsupportedCondition(String),
}

/// Proofs split by claimability, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Proofs the caller can spend
    pub claimable: Proofs,
    /// Proofs the caller can not spend and why
    pub unclaimable: Vec<(Proof, UnclaimableReason)>,
}

/// Check a single proof against the caller's keys
pub fn check_proof(proof: &Proof, keys: &[PublicKey]) -> Result<(), UnclaimableReason> {
    let secret = match nut10::Secret::parse(&proof.secret) {
        Ok(None) => return Ok(()),
        Ok(Some(secret)) => secret,
        Err(nut10::Error::Malformed(err)) => return Err(UnclaimableReason::MalformedSecret(err)),
        Err(nut10::Error::UnsupportedKind(kind)) => {
            return Err(UnclaimableReason::UnsupportedCondition(kind))
        }
    };

    match secret.kind {
        Kind::P2PK => {
            let pubkey = locking_pubkey(&secret)
                .map_err(|err| UnclaimableReason::MalformedSecret(err.to_string()))?;
            if keys.contains(&pubkey) {
                Ok(())
            } else {
                Err(UnclaimableReason::WrongKey(pubkey.to_hex()))
            }
        }
        kind => Err(UnclaimableReason::UnsupportedCondition(kind.to_string())),
    }
}

/// Partition proofs into claimable and unclaimable
pub fn partition_claimable(proofs: &[Proof], keys: &[PublicKey]) -> Partition {
    let mut partition = Partition::default();
    for proof in proofs {
        match check_proof(proof, keys) {
            Ok(()) => partition.claimable.push(proof.clone()),
            Err(reason) => partition.unclaimable.push((proof.clone(), reason)),
        }
    }
    partition
}

/// Claimable subset of `proofs`
///
/// When nothing is claimable the error is the reason of the first proof in
/// input order.
pub fn claimable_proofs(proofs: &[Proof], keys: &[PublicKey]) -> Result<Proofs, String> {
    let partition = partition_claimable(proofs, keys);
    if !partition.claimable.is_empty() {
        return Ok(partition.claimable);
    }

    Err(partition
        .unclaimable
        .into_iter()
        .next()
        .map(|(_, reason)| reason.to_string())
        .unwrap_or_else(|| "Token contains no proofs".to_string()))
}
