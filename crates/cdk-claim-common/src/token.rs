//! Cashu Token
//!
//! Decoding of `cashuA` (V3, JSON) and `cashuB` (V4, CBOR) tokens, encoding of
//! V4 tokens and the [`TokenHash`] idempotency key.
//!
//! <https://github.com/cashubtc/nuts/blob/main/00.md>

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::string::FromUtf8Error;

use bitcoin::base64::engine::{general_purpose, GeneralPurpose};
use bitcoin::base64::{alphabet, Engine as _};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::mint_url::MintUrl;
use crate::nuts::{CurrencyUnit, Id, Proof, Proofs, PublicKey, Witness};
use crate::secret::Secret;
use crate::util::hex;
use crate::{ensure_cdk, Amount};

/// Token Error
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported token
    #[error("Unsupported token")]
    UnsupportedToken,
    /// Unsupported unit
    #[error("Unsupported unit")]
    UnsupportedUnit,
    /// Token spans more than one mint
    #[error("Multi-Mint token not supported")]
    MultiMintTokenNotSupported,
    /// Token contains the same proof more than once
    #[error("Duplicate proofs in token")]
    DuplicateProofs,
    /// Token hash has the wrong length
    #[error("Invalid token hash")]
    InvalidTokenHash,
    /// Base64 error
    #[error(transparent)]
    Base64Error(#[from] bitcoin::base64::DecodeError),
    /// Utf8 parse error
    #[error(transparent)]
    Utf8ParseError(#[from] FromUtf8Error),
    /// Serde Json error
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    /// Ciborium deserialization error
    #[error(transparent)]
    CiboriumError(#[from] ciborium::de::Error<std::io::Error>),
    /// Ciborium serialization error
    #[error(transparent)]
    CiboriumSerError(#[from] ciborium::ser::Error<std::io::Error>),
    /// Hex error
    #[error(transparent)]
    HexError(#[from] bitcoin::hex::HexToBytesError),
    /// Amount Error
    #[error(transparent)]
    Amount(#[from] crate::amount::Error),
}

/// Token Enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    /// Token V3
    TokenV3(TokenV3),
    /// Token V4
    TokenV4(TokenV4),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenV3(token) => token.fmt(f),
            Self::TokenV4(token) => token.fmt(f),
        }
    }
}

impl Token {
    /// Create new V4 [`Token`]
    pub fn new(
        mint_url: MintUrl,
        proofs: Proofs,
        memo: Option<String>,
        unit: CurrencyUnit,
    ) -> Self {
        let mut token: Vec<TokenV4Token> = Vec::new();
        for proof in proofs {
            match token.iter_mut().find(|t| t.keyset_id == proof.keyset_id) {
                Some(group) => group.proofs.push(proof.into()),
                None => token.push(TokenV4Token {
                    keyset_id: proof.keyset_id,
                    proofs: vec![proof.into()],
                }),
            }
        }

        Self::TokenV4(TokenV4 {
            mint_url,
            unit,
            memo,
            token,
        })
    }

    /// Proofs in [`Token`]
    pub fn proofs(&self) -> Proofs {
        match self {
            Self::TokenV3(token) => token.proofs(),
            Self::TokenV4(token) => token.proofs(),
        }
    }

    /// Total value of [`Token`], errors on duplicate proofs
    pub fn value(&self) -> Result<Amount, Error> {
        let proofs = self.proofs();
        let unique = proofs.iter().map(|p| &p.secret).collect::<HashSet<_>>();
        ensure_cdk!(unique.len() == proofs.len(), Error::DuplicateProofs);

        Ok(Amount::try_sum(proofs.iter().map(|p| p.amount))?)
    }

    /// Memo
    pub fn memo(&self) -> &Option<String> {
        match self {
            Self::TokenV3(token) => &token.memo,
            Self::TokenV4(token) => &token.memo,
        }
    }

    /// Unit, V3 tokens without a unit are sat
    pub fn unit(&self) -> CurrencyUnit {
        match self {
            Self::TokenV3(token) => token.unit.clone().unwrap_or_default(),
            Self::TokenV4(token) => token.unit.clone(),
        }
    }

    /// Mint url, errors when the token spans more than one mint
    pub fn mint_url(&self) -> Result<MintUrl, Error> {
        match self {
            Self::TokenV3(token) => {
                let mint_urls = token.mint_urls();
                ensure_cdk!(mint_urls.len() == 1, Error::MultiMintTokenNotSupported);
                mint_urls.into_iter().next().ok_or(Error::UnsupportedToken)
            }
            Self::TokenV4(token) => Ok(token.mint_url.clone()),
        }
    }

    /// Idempotency key of the token content
    pub fn token_hash(&self) -> Result<TokenHash, Error> {
        Ok(TokenHash::from_content(
            &self.mint_url()?,
            &self.unit(),
            &self.proofs(),
        ))
    }
}

fn decode_base64(s: &str) -> Result<Vec<u8>, Error> {
    let decode_config = general_purpose::GeneralPurposeConfig::new()
        .with_decode_padding_mode(bitcoin::base64::engine::DecodePaddingMode::Indifferent);
    Ok(GeneralPurpose::new(&alphabet::URL_SAFE, decode_config).decode(s)?)
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("cashuA") {
            Ok(Self::TokenV3(TokenV3::from_str(s)?))
        } else if s.starts_with("cashuB") {
            Ok(Self::TokenV4(TokenV4::from_str(s)?))
        } else {
            Err(Error::UnsupportedToken)
        }
    }
}

/// Token V3 Token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenV3Token {
    /// Url of mint
    pub mint: MintUrl,
    /// [`Proofs`]
    pub proofs: Proofs,
}

/// Token V3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenV3 {
    /// Proofs in [`Token`] by mint
    pub token: Vec<TokenV3Token>,
    /// Memo for token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Token Unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<CurrencyUnit>,
}

impl TokenV3 {
    fn proofs(&self) -> Proofs {
        self.token
            .iter()
            .flat_map(|t| t.proofs.iter().cloned())
            .collect()
    }

    /// Distinct mint urls of the token
    pub fn mint_urls(&self) -> Vec<MintUrl> {
        let mut mint_urls: Vec<MintUrl> = Vec::new();
        for token in &self.token {
            if !mint_urls.contains(&token.mint) {
                mint_urls.push(token.mint.clone());
            }
        }
        mint_urls
    }
}

impl FromStr for TokenV3 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("cashuA").ok_or(Error::UnsupportedToken)?;

        let decoded_str = String::from_utf8(decode_base64(s)?)?;
        let token: TokenV3 = serde_json::from_str(&decoded_str)?;
        Ok(token)
    }
}

impl fmt::Display for TokenV3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json_string = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        let encoded = general_purpose::URL_SAFE.encode(json_string);
        write!(f, "cashuA{encoded}")
    }
}

/// Token V4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenV4 {
    /// Mint Url
    #[serde(rename = "m")]
    pub mint_url: MintUrl,
    /// Token Unit
    #[serde(rename = "u")]
    pub unit: CurrencyUnit,
    /// Memo for token
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Proofs grouped by keyset_id
    #[serde(rename = "t")]
    pub token: Vec<TokenV4Token>,
}

impl TokenV4 {
    fn proofs(&self) -> Proofs {
        self.token
            .iter()
            .flat_map(|t| t.proofs.iter().map(|p| p.into_proof(t.keyset_id)))
            .collect()
    }
}

impl fmt::Display for TokenV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = Vec::new();
        ciborium::into_writer(self, &mut data).map_err(|_| fmt::Error)?;
        let encoded = general_purpose::URL_SAFE.encode(data);
        write!(f, "cashuB{encoded}")
    }
}

impl FromStr for TokenV4 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("cashuB").ok_or(Error::UnsupportedToken)?;

        let decoded = decode_base64(s)?;
        let token: TokenV4 = ciborium::from_reader(&decoded[..])?;
        Ok(token)
    }
}

/// Token V4 Token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenV4Token {
    /// `Keyset id`
    #[serde(
        rename = "i",
        serialize_with = "serialize_v4_keyset_id",
        deserialize_with = "deserialize_v4_keyset_id"
    )]
    pub keyset_id: Id,
    /// Proofs
    #[serde(rename = "p")]
    pub proofs: Vec<ProofV4>,
}

fn serialize_v4_keyset_id<S>(keyset_id: &Id, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_bytes(&keyset_id.to_bytes())
}

fn deserialize_v4_keyset_id<'de, D>(deserializer: D) -> Result<Id, D::Error>
where
    D: Deserializer<'de>,
{
    let bytes = serde_bytes_vec(deserializer)?;
    Id::from_bytes(&bytes).map_err(serde::de::Error::custom)
}

/// Proof in a V4 token, keyset id lives on the group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofV4 {
    /// Amount
    #[serde(rename = "a")]
    pub amount: Amount,
    /// Secret message
    #[serde(rename = "s")]
    pub secret: Secret,
    /// Unblinded signature
    #[serde(
        serialize_with = "serialize_v4_pubkey",
        deserialize_with = "deserialize_v4_pubkey"
    )]
    pub c: PublicKey,
    /// Witness
    #[serde(rename = "w", default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witness>,
}

impl ProofV4 {
    /// [`ProofV4`] into [`Proof`]
    pub fn into_proof(&self, keyset_id: Id) -> Proof {
        Proof {
            amount: self.amount,
            keyset_id,
            secret: self.secret.clone(),
            c: self.c,
            witness: self.witness.clone(),
        }
    }
}

impl From<Proof> for ProofV4 {
    fn from(proof: Proof) -> ProofV4 {
        ProofV4 {
            amount: proof.amount,
            secret: proof.secret,
            c: proof.c,
            witness: proof.witness,
        }
    }
}

fn serialize_v4_pubkey<S>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_bytes(&key.to_bytes())
}

fn deserialize_v4_pubkey<'de, D>(deserializer: D) -> Result<PublicKey, D::Error>
where
    D: Deserializer<'de>,
{
    let bytes = serde_bytes_vec(deserializer)?;
    PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
}

/// CBOR byte strings arrive as `bytes`, JSON round trips as a sequence
fn serde_bytes_vec<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BytesVisitor;

    impl<'de> serde::de::Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut bytes = Vec::new();
            while let Some(byte) = seq.next_element::<u8>()? {
                bytes.push(byte);
            }
            Ok(bytes)
        }
    }

    deserializer.deserialize_bytes(BytesVisitor)
}

/// Canonical serialization version hashed into [`TokenHash`]
const TOKEN_HASH_VERSION: u8 = 1;

/// Idempotency key of an inbound token
///
/// SHA-256 over a versioned canonical serialization of the mint url, the unit
/// and the proofs sorted by secret. Witnesses are not part of the content, so
/// the same token re-encoded by another wallet hashes to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hash token content
    pub fn from_content(mint_url: &MintUrl, unit: &CurrencyUnit, proofs: &[Proof]) -> Self {
        let mut sorted: Vec<&Proof> = proofs.iter().collect();
        sorted.sort_by(|a, b| a.secret.as_str().cmp(b.secret.as_str()));

        let mut data = vec![TOKEN_HASH_VERSION];
        push_field(&mut data, mint_url.to_string().as_bytes());
        push_field(&mut data, unit.to_string().as_bytes());
        data.extend_from_slice(&(sorted.len() as u64).to_be_bytes());
        for proof in sorted {
            data.extend_from_slice(&proof.amount.to_u64().to_be_bytes());
            push_field(&mut data, &proof.keyset_id.to_bytes());
            push_field(&mut data, proof.secret.as_bytes());
            data.extend_from_slice(&proof.c.to_bytes());
        }

        Self(Sha256::hash(&data).to_byte_array())
    }

    /// Hash bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

fn push_field(data: &mut Vec<u8>, field: &[u8]) {
    data.extend_from_slice(&(field.len() as u64).to_be_bytes());
    data.extend_from_slice(field);
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for TokenHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Ok(Self(
            bytes.try_into().map_err(|_| Error::InvalidTokenHash)?,
        ))
    }
}

impl Serialize for TokenHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_V3: &str = "cashuAeyJ0b2tlbiI6W3sibWludCI6Imh0dHBzOi8vODMzMy5zcGFjZTozMzM4IiwicHJvb2ZzIjpbeyJhbW91bnQiOjIsImlkIjoiMDA5YTFmMjkzMjUzZTQxZSIsInNlY3JldCI6IjQwNzkxNWJjMjEyYmU2MWE3N2UzZTZkMmFlYjRjNzI3OTgwYmRhNTFjZDA2YTZhZmMyOWUyODYxNzY4YTc4MzciLCJDIjoiMDJiYzkwOTc5OTdkODFhZmIyY2M3MzQ2YjVlNDM0NWE5MzQ2YmQyYTUwNmViNzk1ODU5OGE3MmYwY2Y4NTE2M2VhIn0seyJhbW91bnQiOjgsImlkIjoiMDA5YTFmMjkzMjUzZTQxZSIsInNlY3JldCI6ImZlMTUxMDkzMTRlNjFkNzc1NmIwZjhlZTBmMjNhNjI0YWNhYTNmNGUwNDJmNjE0MzNjNzI4YzcwNTdiOTMxYmUiLCJDIjoiMDI5ZThlNTA1MGI4OTBhN2Q2YzA5NjhkYjE2YmMxZDVkNWZhMDQwZWExZGUyODRmNmVjNjlkNjEyOTlmNjcxMDU5In1dfV0sInVuaXQiOiJzYXQiLCJtZW1vIjoiVGhhbmsgeW91LiJ9";

    const TOKEN_V4: &str = "cashuBpGF0gaJhaUgArSaMTR9YJmFwgaNhYQFhc3hAOWE2ZGJiODQ3YmQyMzJiYTc2ZGIwZGYxOTcyMTZiMjlkM2I4Y2MxNDU1M2NkMjc4MjdmYzFjYzk0MmZlZGI0ZWFjWCEDhhhUP_trhpXfStS6vN6So0qWvc2X3O4NfM-Y1HISZ5JhZGlUaGFuayB5b3VhbXVodHRwOi8vbG9jYWxob3N0OjMzMzhhdWNzYXQ=";

    const TOKEN_V4_MULTI_KEYSET: &str = "cashuBo2F0gqJhaUgA_9SLj17PgGFwgaNhYQFhc3hAYWNjMTI0MzVlN2I4NDg0YzNjZjE4NTAxNDkyMThhZjkwZjcxNmE1MmJmNGE1ZWQzNDdlNDhlY2MxM2Y3NzM4OGFjWCECRFODGd5IXVW-07KaZCvuWHk3WrnnpiDhHki6SCQh88-iYWlIAK0mjE0fWCZhcIKjYWECYXN4QDEzMjNkM2Q0NzA3YTU4YWQyZTIzYWRhNGU5ZjFmNDlmNWE1YjRhYzdiNzA4ZWIwZDYxZjczOGY0ODMwN2U4ZWVhY1ghAjRWqhENhLSsdHrr2Cw7AFrKUL9Ffr1XN6RBT6w659lNo2FhAWFzeEA1NmJjYmNiYjdjYzY0MDZiM2ZhNWQ1N2QyMTc0ZjRlZmY4YjQ0MDJiMTc2OTI2ZDNhNTdkM2MzZGNiYjU5ZDU3YWNYIQJzEpxXGeWZN5qXSmJjY8MzxWyvwObQGr5G1YCCgHicY2FtdWh0dHA6Ly9sb2NhbGhvc3Q6MzMzOGF1Y3NhdA==";

    #[test]
    fn test_token_v3_decode() {
        let token = Token::from_str(TOKEN_V3).unwrap();

        assert_eq!(
            token.mint_url().unwrap(),
            MintUrl::from_str("https://8333.space:3338").unwrap()
        );
        assert_eq!(token.unit(), CurrencyUnit::Sat);
        assert_eq!(token.memo().as_deref(), Some("Thank you."));
        assert_eq!(token.value().unwrap(), Amount::from(10));
        assert_eq!(
            token.proofs()[0].keyset_id,
            Id::from_str("009a1f293253e41e").unwrap()
        );
    }

    #[test]
    fn test_token_v4_decode_and_encode() {
        let token = Token::from_str(TOKEN_V4).unwrap();

        assert_eq!(
            token.mint_url().unwrap(),
            MintUrl::from_str("http://localhost:3338").unwrap()
        );
        assert_eq!(
            token.proofs()[0].keyset_id,
            Id::from_str("00ad268c4d1f5826").unwrap()
        );
        assert_eq!(token.value().unwrap(), Amount::ONE);

        let reencoded = Token::from_str(&token.to_string()).unwrap();
        assert_eq!(reencoded, token);
    }

    #[test]
    fn test_token_v4_multi_keyset() {
        let token = Token::from_str(TOKEN_V4_MULTI_KEYSET).unwrap();

        assert_eq!(token.value().unwrap(), Amount::from(4));

        let keysets: HashSet<Id> = token.proofs().iter().map(|p| p.keyset_id).collect();
        assert_eq!(keysets.len(), 2);
        assert!(keysets.contains(&Id::from_str("00ffd48b8f5ecf80").unwrap()));
        assert!(keysets.contains(&Id::from_str("00ad268c4d1f5826").unwrap()));
    }

    #[test]
    fn test_incorrect_tokens() {
        assert!(Token::from_str(&format!("casshu{}", &TOKEN_V3[5..])).is_err());
        assert!(Token::from_str(&TOKEN_V3[6..]).is_err());
        assert!(Token::from_str("cashuBnotbase64!!").is_err());
    }

    #[test]
    fn test_token_hash_is_encoding_independent() {
        let v3 = Token::from_str(TOKEN_V3).unwrap();

        let mut proofs = v3.proofs();
        let as_v4 = Token::new(
            v3.mint_url().unwrap(),
            proofs.clone(),
            None,
            CurrencyUnit::Sat,
        );

        // memo, version and proof order do not change the key
        proofs.reverse();
        let reordered = Token::new(
            v3.mint_url().unwrap(),
            proofs,
            Some("other memo".to_string()),
            CurrencyUnit::Sat,
        );

        let hash = v3.token_hash().unwrap();
        assert_eq!(as_v4.token_hash().unwrap(), hash);
        assert_eq!(reordered.token_hash().unwrap(), hash);

        let other_unit = Token::new(
            v3.mint_url().unwrap(),
            v3.proofs(),
            None,
            CurrencyUnit::Usd,
        );
        assert_ne!(other_unit.token_hash().unwrap(), hash);

        assert_eq!(TokenHash::from_str(&hash.to_string()).unwrap(), hash);
    }

    #[test]
    fn test_duplicate_proofs() {
        let v3 = Token::from_str(TOKEN_V3).unwrap();
        let mut proofs = v3.proofs();
        proofs.push(proofs[0].clone());

        let token = Token::new(v3.mint_url().unwrap(), proofs, None, CurrencyUnit::Sat);
        assert!(matches!(token.value(), Err(Error::DuplicateProofs)));
    }
}
