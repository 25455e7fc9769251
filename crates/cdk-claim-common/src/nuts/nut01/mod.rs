//! NUT-01: Mint public key exchange
//!
//! <https://github.com/cashubtc/nuts/blob/main/01.md>

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod public_key;
mod secret_key;

pub use self::public_key::PublicKey;
pub use self::secret_key::SecretKey;
use crate::Amount;

/// Nut01 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Secp256k1 Error
    #[error(transparent)]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
    /// Invalid public key size
    #[error("Invalid public key size: expected={expected}, found={found}")]
    InvalidPublicKeySize {
        /// Expected size
        expected: usize,
        /// Actual size
        found: usize,
    },
}

/// Mint public keys per amount
///
/// Keyed by the amount each key signs for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Keys(BTreeMap<Amount, PublicKey>);

impl From<BTreeMap<Amount, PublicKey>> for Keys {
    fn from(keys: BTreeMap<Amount, PublicKey>) -> Self {
        Self(keys)
    }
}

impl Keys {
    /// Create new [`Keys`]
    #[inline]
    pub fn new(keys: BTreeMap<Amount, PublicKey>) -> Self {
        Self(keys)
    }

    /// Get pubkey for amount
    #[inline]
    pub fn amount_key(&self, amount: Amount) -> Option<PublicKey> {
        self.0.get(&amount).copied()
    }
}

impl Deref for Keys {
    type Target = BTreeMap<Amount, PublicKey>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Keys {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Mint keys response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysResponse {
    /// Keysets
    pub keysets: Vec<super::KeySet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_json_uses_amount_strings() {
        let pubkey = SecretKey::generate().public_key();
        let mut map = BTreeMap::new();
        map.insert(Amount::from(1), pubkey);
        let keys = Keys::new(map);

        let json = serde_json::to_string(&keys).unwrap();
        assert_eq!(json, format!("{{\"1\":\"{}\"}}", pubkey.to_hex()));

        let decoded: Keys = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.amount_key(Amount::from(1)), Some(pubkey));
        assert_eq!(decoded.amount_key(Amount::from(2)), None);
    }
}
