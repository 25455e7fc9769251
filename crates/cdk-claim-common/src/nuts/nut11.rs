//! NUT-11: Pay to Public Key (P2PK)
//!
//! <https://github.com/cashubtc/nuts/blob/main/11.md>

use std::str::FromStr;

use bitcoin::secp256k1::schnorr::Signature;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::nut00::{Proof, Witness};
use super::nut01::{PublicKey, SecretKey};
use super::nut10::{self, Kind};

/// Nut11 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Secret is not a P2PK secret
    #[error("Secret is not a p2pk secret")]
    IncorrectSecretKind,
    /// Witness signatures not provided
    #[error("Witness signatures not provided")]
    SignaturesNotProvided,
    /// Spending conditions not met
    #[error("Spending conditions not met")]
    SpendConditionsNotMet,
    /// NUT01 Error
    #[error(transparent)]
    NUT01(#[from] super::nut01::Error),
    /// NUT10 Error
    #[error(transparent)]
    NUT10(#[from] nut10::Error),
    /// Secp256k1 error
    #[error(transparent)]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
}

/// P2Pk Witness
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct P2PKWitness {
    /// Signatures
    pub signatures: Vec<String>,
}

/// Public key a P2PK secret is locked to
pub fn locking_pubkey(secret: &nut10::Secret) -> Result<PublicKey, Error> {
    if secret.kind != Kind::P2PK {
        return Err(Error::IncorrectSecretKind);
    }
    Ok(PublicKey::from_str(&secret.secret_data.data)?)
}

impl Proof {
    /// Sign a P2PK proof, appending to any signatures already present
    pub fn sign_p2pk(&mut self, secret_key: &SecretKey) {
        let signature = secret_key.sign(self.secret.as_bytes());

        let mut signatures = self
            .witness
            .as_ref()
            .map(|w| w.signatures().to_vec())
            .unwrap_or_default();
        signatures.push(signature.to_string());

        self.witness = Some(Witness::P2PKWitness(P2PKWitness { signatures }));
    }

    /// Verify the witness signs the secret with the locking key
    pub fn verify_p2pk(&self) -> Result<(), Error> {
        let secret = nut10::Secret::parse(&self.secret)?.ok_or(Error::IncorrectSecretKind)?;
        let pubkey = locking_pubkey(&secret)?;

        let witness = self.witness.as_ref().ok_or(Error::SignaturesNotProvided)?;

        for signature in witness.signatures() {
            let Ok(signature) = Signature::from_str(signature) else {
                continue;
            };
            if pubkey.verify(self.secret.as_bytes(), &signature).is_ok() {
                return Ok(());
            }
        }

        Err(Error::SpendConditionsNotMet)
    }
}

/// Serde utils for P2PK Witness
pub mod serde_p2pk_witness {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    use super::P2PKWitness;

    /// Serialize [P2PKWitness] as stringified JSON
    pub fn serialize<S>(x: &P2PKWitness, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&serde_json::to_string(&x).map_err(ser::Error::custom)?)
    }

    /// Deserialize [P2PKWitness] from stringified JSON
    pub fn deserialize<'de, D>(deserializer: D) -> Result<P2PKWitness, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        serde_json::from_str(&s).map_err(de::Error::custom)
    }
}
