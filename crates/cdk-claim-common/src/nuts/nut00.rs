//! NUT-00: Notation and Models
//!
//! <https://github.com/cashubtc/nuts/blob/main/00.md>

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::nut01::{PublicKey, SecretKey};
use super::nut02::Id;
use super::nut11::P2PKWitness;
use crate::secret::Secret;
use crate::{amount, Amount};

/// List of [Proof]
pub type Proofs = Vec<Proof>;

/// NUT00 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Amount Error
    #[error(transparent)]
    Amount(#[from] amount::Error),
    /// Unsupported payment method
    #[error("Unsupported payment method")]
    UnsupportedPaymentMethod,
}

/// Utility methods for [Proofs]
pub trait ProofsMethods {
    /// Try to sum up the amounts of all [Proof]s
    fn total_amount(&self) -> Result<Amount, Error>;

    /// Try to fetch the pubkeys of all [Proof]s
    fn ys(&self) -> Result<Vec<PublicKey>, crate::dhke::Error>;
}

impl ProofsMethods for Proofs {
    fn total_amount(&self) -> Result<Amount, Error> {
        self.as_slice().total_amount()
    }

    fn ys(&self) -> Result<Vec<PublicKey>, crate::dhke::Error> {
        self.as_slice().ys()
    }
}

impl ProofsMethods for [Proof] {
    fn total_amount(&self) -> Result<Amount, Error> {
        Ok(Amount::try_sum(self.iter().map(|p| p.amount))?)
    }

    fn ys(&self) -> Result<Vec<PublicKey>, crate::dhke::Error> {
        self.iter().map(Proof::y).collect()
    }
}

/// Witness attached to a proof
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Witness {
    /// P2PK Witness
    #[serde(with = "super::nut11::serde_p2pk_witness")]
    P2PKWitness(P2PKWitness),
}

impl Witness {
    /// Signatures carried by the witness
    pub fn signatures(&self) -> &[String] {
        match self {
            Self::P2PKWitness(witness) => &witness.signatures,
        }
    }
}

/// Proofs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proof {
    /// Amount
    pub amount: Amount,
    /// `Keyset id`
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// Secret message
    pub secret: Secret,
    /// Unblinded signature
    #[serde(rename = "C")]
    pub c: PublicKey,
    /// Witness
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witness>,
}

impl Proof {
    /// Create new [`Proof`]
    pub fn new(amount: Amount, keyset_id: Id, secret: Secret, c: PublicKey) -> Self {
        Proof {
            amount,
            keyset_id,
            secret,
            c,
            witness: None,
        }
    }

    /// Get y from proof
    ///
    /// Where y is `hash_to_curve(secret)`
    pub fn y(&self) -> Result<PublicKey, crate::dhke::Error> {
        crate::dhke::hash_to_curve(self.secret.as_bytes())
    }
}

/// Blind Message (also called `output`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlindedMessage {
    /// Amount
    pub amount: Amount,
    /// Keyset ID
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// Blinded secret message (B_)
    #[serde(rename = "B_")]
    pub blinded_secret: PublicKey,
}

impl BlindedMessage {
    /// Compose new blinded message
    #[inline]
    pub fn new(amount: Amount, keyset_id: Id, blinded_secret: PublicKey) -> Self {
        Self {
            amount,
            keyset_id,
            blinded_secret,
        }
    }
}

/// Blind Signature (also called `promise`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlindSignature {
    /// Amount
    pub amount: Amount,
    /// Keyset ID
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// Blinded signature (C_)
    #[serde(rename = "C_")]
    pub c: PublicKey,
}

/// Currency Unit
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CurrencyUnit {
    /// Sat
    #[default]
    Sat,
    /// Msat
    Msat,
    /// Usd
    Usd,
    /// Euro
    Eur,
    /// Custom currency unit
    Custom(String),
}

impl FromStr for CurrencyUnit {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "sat" => Ok(Self::Sat),
            "msat" => Ok(Self::Msat),
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            _ => Ok(Self::Custom(value.to_lowercase())),
        }
    }
}

impl fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CurrencyUnit::Sat => "sat",
            CurrencyUnit::Msat => "msat",
            CurrencyUnit::Usd => "usd",
            CurrencyUnit::Eur => "eur",
            CurrencyUnit::Custom(unit) => unit,
        };
        write!(f, "{s}")
    }
}

impl Serialize for CurrencyUnit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CurrencyUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let currency: String = String::deserialize(deserializer)?;
        Self::from_str(&currency).map_err(|_| serde::de::Error::custom("Unsupported unit"))
    }
}

/// Payment Method
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PaymentMethod {
    /// Bolt11 payment type
    #[default]
    Bolt11,
}

impl FromStr for PaymentMethod {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "bolt11" => Ok(Self::Bolt11),
            _ => Err(Error::UnsupportedPaymentMethod),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Bolt11 => write!(f, "bolt11"),
        }
    }
}

impl Serialize for PaymentMethod {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PaymentMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let payment_method: String = String::deserialize(deserializer)?;
        Self::from_str(&payment_method).map_err(serde::de::Error::custom)
    }
}

/// Pre mint secret: the blinded message together with what unblinds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreMint {
    /// Blinded message
    pub blinded_message: BlindedMessage,
    /// Secret
    pub secret: Secret,
    /// R
    pub r: SecretKey,
    /// Amount
    pub amount: Amount,
}

/// Ordered set of [`PreMint`]s for one keyset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreMintSecrets {
    /// Secrets
    pub secrets: Vec<PreMint>,
    /// Keyset Id
    pub keyset_id: Id,
}

impl PreMintSecrets {
    /// Create new [`PreMintSecrets`]
    pub fn new(keyset_id: Id) -> Self {
        Self {
            secrets: Vec::new(),
            keyset_id,
        }
    }

    /// Blinded messages
    #[inline]
    pub fn blinded_messages(&self) -> Vec<BlindedMessage> {
        self.secrets
            .iter()
            .map(|pm| pm.blinded_message.clone())
            .collect()
    }

    /// Secrets
    #[inline]
    pub fn secrets(&self) -> Vec<Secret> {
        self.secrets.iter().map(|pm| pm.secret.clone()).collect()
    }

    /// Blinding factors
    #[inline]
    pub fn rs(&self) -> Vec<SecretKey> {
        self.secrets.iter().map(|pm| pm.r.clone()).collect()
    }

    /// Amounts
    #[inline]
    pub fn amounts(&self) -> Vec<Amount> {
        self.secrets.iter().map(|pm| pm.amount).collect()
    }

    /// Total amount of the outputs
    pub fn total_amount(&self) -> Result<Amount, Error> {
        Ok(Amount::try_sum(self.secrets.iter().map(|pm| pm.amount))?)
    }

    /// Number of outputs
    #[inline]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// True when there are no outputs
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
