//! NUT-02: Keysets and keyset ID
//!
//! <https://github.com/cashubtc/nuts/blob/main/02.md>

use core::fmt;
use core::str::FromStr;

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::nut00::CurrencyUnit;
use super::nut01::Keys;
use crate::util::hex;

/// NUT02 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Hex Error
    #[error(transparent)]
    HexError(#[from] bitcoin::hex::HexToBytesError),
    /// Keyset length error
    #[error("NUT02: ID length invalid")]
    Length,
    /// Unknown version
    #[error("NUT02: Unknown Version")]
    UnknownVersion,
}

/// Keyset version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySetVersion {
    /// Version 00, 8 byte ids
    Version00,
    /// Version 01, 33 byte ids
    Version01,
}

impl KeySetVersion {
    /// [`KeySetVersion`] to byte
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Version00 => 0,
            Self::Version01 => 1,
        }
    }

    /// [`KeySetVersion`] from byte
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Self::Version00),
            1 => Ok(Self::Version01),
            _ => Err(Error::UnknownVersion),
        }
    }
}

/// A keyset ID is an identifier for a specific keyset. It can be derived by
/// anyone who knows the set of public keys of a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Id {
    /// Version 00 id, version byte followed by 7 bytes
    V00([u8; 7]),
    /// Version 01 id, version byte followed by 32 bytes
    V01([u8; 32]),
}

impl Id {
    /// Keyset version
    pub fn get_version(&self) -> KeySetVersion {
        match self {
            Self::V00(_) => KeySetVersion::Version00,
            Self::V01(_) => KeySetVersion::Version01,
        }
    }

    /// [`Id`] to bytes, version byte first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.get_version().to_byte()];
        match self {
            Self::V00(id) => bytes.extend_from_slice(id),
            Self::V01(id) => bytes.extend_from_slice(id),
        }
        bytes
    }

    /// [`Id`] from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let (version, id) = bytes.split_first().ok_or(Error::Length)?;
        match KeySetVersion::from_byte(*version)? {
            KeySetVersion::Version00 => {
                Ok(Self::V00(id.try_into().map_err(|_| Error::Length)?))
            }
            KeySetVersion::Version01 => {
                Ok(Self::V01(id.try_into().map_err(|_| Error::Length)?))
            }
        }
    }

    /// Derive a version 00 id from mint keys
    ///
    /// sha256 over the concatenated compressed keys sorted by amount, first 7
    /// bytes, prefixed with the version byte.
    pub fn v00_from_keys(keys: &Keys) -> Self {
        let pubkeys_concat: Vec<u8> = keys
            .values()
            .flat_map(|pubkey| pubkey.to_bytes())
            .collect();

        let hash = Sha256::hash(&pubkeys_concat).to_byte_array();
        let mut id = [0u8; 7];
        id.copy_from_slice(&hash[..7]);
        Self::V00(id)
    }

    /// Legacy NUT-13 derivation index: big endian integer of the id modulo `2^31 - 1`
    pub fn to_derivation_index(&self) -> Result<u32, Error> {
        let bytes: [u8; 8] = self.to_bytes().try_into().map_err(|_| Error::Length)?;
        let index = u64::from_be_bytes(bytes) % (2_u64.pow(31) - 1);
        u32::try_from(index).map_err(|_| Error::Length)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 && s.len() != 66 {
            return Err(Error::Length);
        }

        Self::from_bytes(&hex::decode(s)?)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let id = String::deserialize(deserializer)?;
        Id::from_str(&id).map_err(serde::de::Error::custom)
    }
}

/// Keyset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeySet {
    /// Keyset [`Id`]
    pub id: Id,
    /// Keyset [`CurrencyUnit`]
    pub unit: CurrencyUnit,
    /// Keyset [`Keys`]
    pub keys: Keys,
}

/// KeySetInfo
#[derive(Debug, Clone, Hash, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeySetInfo {
    /// Keyset [`Id`]
    pub id: Id,
    /// Keyset [`CurrencyUnit`]
    pub unit: CurrencyUnit,
    /// Keyset state
    /// Mint will only sign from an active keyset
    pub active: bool,
    /// Input Fee PPK
    #[serde(default)]
    pub input_fee_ppk: u64,
}

/// Mint keysets response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetResponse {
    /// Keysets known to the mint
    pub keysets: Vec<KeySetInfo>,
}
