//! NUT-10: Spending conditions
//!
//! <https://github.com/cashubtc/nuts/blob/main/10.md>

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// NUT10 Error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Secret looks structured but does not follow the NUT-10 layout
    #[error("Malformed secret: {0}")]
    Malformed(String),
    /// Kind is not one we know how to evaluate
    #[error("Unsupported spending condition: {0}")]
    UnsupportedKind(String),
}

/// Spending condition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// NUT-11 P2PK
    P2PK,
    /// NUT-14 HTLC
    HTLC,
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "P2PK" => Ok(Self::P2PK),
            "HTLC" => Ok(Self::HTLC),
            other => Err(Error::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P2PK => write!(f, "P2PK"),
            Self::HTLC => write!(f, "HTLC"),
        }
    }
}

/// Secret data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretData {
    /// Unique random string
    pub nonce: String,
    /// Expresses the spending condition specific to each kind
    pub data: String,
    /// Additional data committed to and can be used for feature extensions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Vec<String>>,
}

/// NUT-10 well-known secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// Kind of the spending condition
    pub kind: Kind,
    /// Secret data
    pub secret_data: SecretData,
}

impl Secret {
    /// Create new [`Secret`] with a random nonce
    pub fn new<S>(kind: Kind, data: S, tags: Vec<Vec<String>>) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            secret_data: SecretData {
                nonce: crate::secret::Secret::generate().to_string(),
                data: data.into(),
                tags,
            },
        }
    }

    /// Parse a proof secret
    ///
    /// Returns `Ok(None)` for plain secrets. A JSON array is treated as a
    /// structured secret and must follow `[kind, {nonce, data, tags}]`.
    pub fn parse(secret: &crate::secret::Secret) -> Result<Option<Self>, Error> {
        let value = match serde_json::from_str::<Value>(secret.as_str()) {
            Ok(Value::Array(items)) => items,
            Ok(_) => return Ok(None),
            Err(_) if secret.as_str().trim_start().starts_with('[') => {
                return Err(Error::Malformed("invalid json".to_string()))
            }
            Err(_) => return Ok(None),
        };

        let [kind, data] = <[Value; 2]>::try_from(value)
            .map_err(|items| Error::Malformed(format!("expected 2 elements, got {}", items.len())))?;

        let kind = kind
            .as_str()
            .ok_or_else(|| Error::Malformed("kind is not a string".to_string()))?
            .parse::<Kind>()?;

        let secret_data: SecretData =
            serde_json::from_value(data).map_err(|e| Error::Malformed(e.to_string()))?;

        Ok(Some(Self { kind, secret_data }))
    }

    /// Values of the first tag named `key`
    pub fn tag(&self, key: &str) -> Option<&[String]> {
        self.secret_data
            .tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(key))
            .map(|tag| &tag[1..])
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_tuple(2)?;
        s.serialize_element(&self.kind)?;
        s.serialize_element(&self.secret_data)?;
        s.end()
    }
}

impl TryFrom<&Secret> for crate::secret::Secret {
    type Error = serde_json::Error;

    fn try_from(secret: &Secret) -> Result<Self, Self::Error> {
        Ok(crate::secret::Secret::new(serde_json::to_string(secret)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_serialize() {
        let secret = Secret {
            kind: Kind::P2PK,
            secret_data: SecretData {
                nonce: "5d11913ee0f92fefdc82a6764fd2457a".to_string(),
                data: "026562efcfadc8e86d44da6a8adf80633d974302e62c850774db1fb36ff4cc7198"
                    .to_string(),
                tags: vec![vec![
                    "key".to_string(),
                    "value1".to_string(),
                    "value2".to_string(),
                ]],
            },
        };

        let secret_str = r#"["P2PK",{"nonce":"5d11913ee0f92fefdc82a6764fd2457a","data":"026562efcfadc8e86d44da6a8adf80633d974302e62c850774db1fb36ff4cc7198","tags":[["key","value1","value2"]]}]"#;

        assert_eq!(serde_json::to_string(&secret).unwrap(), secret_str);

        let parsed = Secret::parse(&crate::secret::Secret::new(secret_str))
            .unwrap()
            .unwrap();
        assert_eq!(parsed, secret);
        assert_eq!(
            parsed.tag("key"),
            Some(&["value1".to_string(), "value2".to_string()][..])
        );
    }

    #[test]
    fn test_plain_secret() {
        let plain = crate::secret::Secret::new(
            "407915bc212be61a77e3e6d2aeb4c727980bda51cd06a6afc29e2861768a7837",
        );
        assert_eq!(Secret::parse(&plain), Ok(None));
    }

    #[test]
    fn test_malformed_and_unsupported() {
        let malformed = crate::secret::Secret::new(r#"["P2PK",{"nonce":"ab"}"#);
        assert!(matches!(Secret::parse(&malformed), Err(Error::Malformed(_))));

        let missing_data = crate::secret::Secret::new(r#"["P2PK",{"nonce":"ab"}]"#);
        assert!(matches!(
            Secret::parse(&missing_data),
            Err(Error::Malformed(_))
        ));

        let unknown = crate::secret::Secret::new(r#"["DLC",{"nonce":"ab","data":"cd"}]"#);
        assert_eq!(
            Secret::parse(&unknown),
            Err(Error::UnsupportedKind("DLC".to_string()))
        );
    }
}
