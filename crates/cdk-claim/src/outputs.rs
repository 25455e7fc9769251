//! Deterministic outputs and restore
//!
//! Outputs are a pure function of `(seed, keyset, counter, amounts)` (NUT-13),
//! so outputs committed to a reservation can be regenerated after a crash or
//! an ambiguous mint answer and their signatures fetched back with NUT-09
//! restore instead of treating the mint call as failed.

use std::collections::HashMap;

use cdk_claim_common::dhke::construct_proofs;
use cdk_claim_common::wallet::OutputReservation;
use cdk_claim_common::{
    Amount, BlindSignature, Error as CashuError, Id, Keys, MintConnector, PreMintSecrets, Proofs,
    ProofsMethods, PublicKey, RestoreRequest,
};
use tracing::instrument;

use crate::Error;

/// Error message fragments of mints that do not send NUT error codes
const ALREADY_ISSUED_MESSAGES: [&str; 4] = [
    "already signed",
    "already been signed",
    "already issued",
    "outputs have already",
];

/// Reserve outputs for `amount` starting at `counter`
///
/// Amounts follow the canonical power of two split, largest first.
pub fn reservation(keyset_id: Id, counter: u32, amount: Amount) -> OutputReservation {
    OutputReservation {
        keyset_id,
        keyset_counter: counter,
        output_amounts: amount.split(),
    }
}

/// Reserve NUT-08 blank outputs able to carry up to `max_change`
///
/// `max(ceil(log2(max_change)), 1)` outputs, their amounts are set by the
/// mint when it signs the change.
pub fn blank_reservation(keyset_id: Id, counter: u32, max_change: Amount) -> OutputReservation {
    let count = (u64::BITS - max_change.to_u64().saturating_sub(1).leading_zeros()).max(1);
    OutputReservation {
        keyset_id,
        keyset_counter: counter,
        output_amounts: vec![Amount::ZERO; count as usize],
    }
}

/// Derive the blinded outputs of a reservation
pub fn derive_outputs(
    seed: &[u8; 64],
    outputs: &OutputReservation,
) -> Result<PreMintSecrets, Error> {
    Ok(PreMintSecrets::from_seed_with_amounts(
        outputs.keyset_id,
        outputs.keyset_counter,
        seed,
        &outputs.output_amounts,
    )?)
}

/// Unblind the signatures the mint returned for `pre_mint`
pub fn construct(
    pre_mint: &PreMintSecrets,
    signatures: Vec<BlindSignature>,
    keys: &Keys,
) -> Result<Proofs, Error> {
    if signatures.len() != pre_mint.len() {
        return Err(CashuError::InvalidMintResponse(format!(
            "expected {} signatures, got {}",
            pre_mint.len(),
            signatures.len()
        ))
        .into());
    }

    Ok(construct_proofs(
        signatures,
        pre_mint.rs(),
        pre_mint.secrets(),
        keys,
    )?)
}

/// Unblind melt change
///
/// The mint signs a prefix of the blank outputs, one per change amount.
pub fn construct_change(
    pre_mint: &PreMintSecrets,
    signatures: Vec<BlindSignature>,
    keys: &Keys,
) -> Result<Proofs, Error> {
    if signatures.len() > pre_mint.len() {
        return Err(CashuError::InvalidMintResponse(format!(
            "{} change signatures for {} blank outputs",
            signatures.len(),
            pre_mint.len()
        ))
        .into());
    }

    let mut signed = PreMintSecrets::new(pre_mint.keyset_id);
    signed
        .secrets
        .extend(pre_mint.secrets.iter().take(signatures.len()).cloned());
    construct(&signed, signatures, keys)
}

/// Mint answered that the outputs or the quote were already signed
///
/// Uses the NUT error codes 11003 and 20002 when the mint sends them and
/// falls back to matching the message of mints that do not. Callers restore
/// on `true` instead of failing.
pub fn is_already_issued(err: &CashuError) -> bool {
    match err {
        CashuError::BlindedMessageAlreadySigned | CashuError::IssuedQuote => true,
        CashuError::UnknownErrorResponse(message)
        | CashuError::Custom(message)
        | CashuError::HttpError(Some(_), message) => {
            let message = message.to_lowercase();
            ALREADY_ISSUED_MESSAGES
                .iter()
                .any(|fragment| message.contains(fragment))
        }
        _ => false,
    }
}

/// Restore proofs for counters `counter_start..counter_start + count`
///
/// Returns the proofs of every output in the range the mint has signed, in
/// counter order. Outputs the mint never signed are skipped.
#[instrument(skip(connector, seed, keys))]
pub async fn restore(
    connector: &(dyn MintConnector + Send + Sync),
    seed: &[u8; 64],
    keys: &Keys,
    keyset_id: Id,
    counter_start: u32,
    count: u32,
) -> Result<Proofs, Error> {
    if count == 0 {
        return Ok(Proofs::new());
    }
    let counter_end = counter_start
        .checked_add(count - 1)
        .ok_or(cdk_claim_common::nuts::nut13::Error::CounterOverflow)?;

    let pre_mint = PreMintSecrets::restore_batch(keyset_id, seed, counter_start, counter_end)?;
    restore_pre_mint(connector, &pre_mint, keys).await
}

/// Restore the signatures of already derived outputs
pub(crate) async fn restore_pre_mint(
    connector: &(dyn MintConnector + Send + Sync),
    pre_mint: &PreMintSecrets,
    keys: &Keys,
) -> Result<Proofs, Error> {
    let response = connector
        .post_restore(RestoreRequest {
            outputs: pre_mint.blinded_messages(),
        })
        .await?;

    if response.outputs.len() != response.signatures.len() {
        return Err(CashuError::InvalidMintResponse(
            "restore outputs and signatures differ in length".to_string(),
        )
        .into());
    }

    let mut signatures: HashMap<PublicKey, BlindSignature> = response
        .outputs
        .into_iter()
        .zip(response.signatures)
        .map(|(output, signature)| (output.blinded_secret, signature))
        .collect();

    let mut restored = PreMintSecrets::new(pre_mint.keyset_id);
    let mut restored_signatures = Vec::new();
    for pre in &pre_mint.secrets {
        if let Some(signature) = signatures.remove(&pre.blinded_message.blinded_secret) {
            restored.secrets.push(pre.clone());
            restored_signatures.push(signature);
        }
    }

    tracing::debug!(
        "Restored {} of {} outputs for keyset {}",
        restored.len(),
        pre_mint.len(),
        pre_mint.keyset_id
    );

    construct(&restored, restored_signatures, keys)
}

/// Recover the proofs of a reservation after the mint reported it signed
///
/// Fails with [`Error::RestoreIncomplete`] unless every reserved output comes
/// back.
#[instrument(skip(connector, pre_mint, keys))]
pub(crate) async fn recover_reservation(
    connector: &(dyn MintConnector + Send + Sync),
    pre_mint: &PreMintSecrets,
    outputs: &OutputReservation,
    keys: &Keys,
) -> Result<Proofs, Error> {
    let proofs = restore_pre_mint(connector, pre_mint, keys).await?;

    let expected = outputs.total_amount()?;
    let found = proofs.total_amount()?;
    if found != expected {
        tracing::warn!(
            "Restore of counters {}..{} returned {} of {}",
            outputs.keyset_counter,
            outputs.next_counter(),
            found,
            expected
        );
        return Err(Error::RestoreIncomplete { expected, found });
    }

    Ok(proofs)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use cdk_claim_common::{ErrorCode, ErrorResponse};

    use super::*;

    fn seed() -> [u8; 64] {
        let mnemonic = bip39::Mnemonic::from_str(
            "half depart obvious quality work element tank gorilla view sugar picture humble",
        )
        .unwrap();
        mnemonic.to_seed_normalized("")
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let keyset_id = Id::from_str("009a1f293253e41e").unwrap();
        let outputs = reservation(keyset_id, 7, Amount::from(1000));
        assert_eq!(outputs.count(), 6);
        assert_eq!(outputs.total_amount().unwrap(), Amount::from(1000));

        let first = derive_outputs(&seed(), &outputs).unwrap();
        let second = derive_outputs(&seed(), &outputs).unwrap();
        assert_eq!(first.blinded_messages(), second.blinded_messages());
        assert_eq!(first.total_amount().unwrap(), Amount::from(1000));

        let shifted = derive_outputs(&seed(), &reservation(keyset_id, 8, Amount::from(1000)))
            .unwrap();
        assert_ne!(first.blinded_messages(), shifted.blinded_messages());
    }

    #[test]
    fn test_restore_batch_matches_reserved_outputs() {
        let keyset_id = Id::from_str("009a1f293253e41e").unwrap();
        let outputs = reservation(keyset_id, 3, Amount::from(13));
        let derived = derive_outputs(&seed(), &outputs).unwrap();

        let batch = PreMintSecrets::restore_batch(keyset_id, &seed(), 3, 5).unwrap();
        let derived_b: Vec<_> = derived
            .blinded_messages()
            .into_iter()
            .map(|b| b.blinded_secret)
            .collect();
        let batch_b: Vec<_> = batch
            .blinded_messages()
            .into_iter()
            .map(|b| b.blinded_secret)
            .collect();
        assert_eq!(derived_b, batch_b);
    }

    #[test]
    fn test_blank_outputs_cover_change() {
        let keyset_id = Id::from_str("009a1f293253e41e").unwrap();
        let count = |change: u64| blank_reservation(keyset_id, 0, Amount::from(change)).count();

        assert_eq!(count(1), 1);
        assert_eq!(count(2), 1);
        assert_eq!(count(10), 4);
        assert_eq!(count(16), 4);
        assert_eq!(count(17), 5);

        // Every change up to the maximum fits the reserved outputs
        for change in 1..=64u64 {
            let split = Amount::from(change).split().len() as u32;
            assert!(split <= count(64), "{change}");
        }
    }

    #[test]
    fn test_change_signatures_beyond_blank_outputs_rejected() {
        let keyset_id = Id::from_str("009a1f293253e41e").unwrap();
        let pre_mint =
            derive_outputs(&seed(), &blank_reservation(keyset_id, 0, Amount::from(2))).unwrap();
        let signature = BlindSignature {
            amount: Amount::from(1),
            keyset_id,
            c: pre_mint.secrets[0].blinded_message.blinded_secret,
        };

        let keys = Keys::new(Default::default());

        let err = construct_change(&pre_mint, vec![signature.clone(), signature], &keys)
            .unwrap_err();
        assert!(matches!(err, Error::Cashu(CashuError::InvalidMintResponse(_))));

        let none = construct_change(&pre_mint, vec![], &keys).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_already_issued_detection() {
        let by_code: CashuError =
            ErrorResponse::new(ErrorCode::BlindedMessageAlreadySigned, "whatever").into();
        assert!(is_already_issued(&by_code));

        let by_code: CashuError =
            ErrorResponse::new(ErrorCode::TokensAlreadyIssued, "whatever").into();
        assert!(is_already_issued(&by_code));

        let by_message: CashuError =
            ErrorResponse::new(ErrorCode::Unknown(10000), "Outputs Have Already Been Signed").into();
        assert!(is_already_issued(&by_message));

        assert!(is_already_issued(&CashuError::Custom(
            "quote already issued".to_string()
        )));
        assert!(!is_already_issued(&CashuError::TokenAlreadySpent));
        assert!(!is_already_issued(&CashuError::HttpError(
            None,
            "already signed".to_string()
        )));
    }
}
