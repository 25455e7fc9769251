//! Mint Url

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{ParseError, Url};

use crate::ensure_cdk;

/// Url Error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Url error
    #[error(transparent)]
    Url(#[from] ParseError),
    /// Invalid URL structure
    #[error("Invalid URL")]
    InvalidUrl,
}

/// Normalized mint url
///
/// Scheme and host are lowercased and trailing slashes are removed so that two
/// spellings of the same mint compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MintUrl(String);

impl MintUrl {
    fn normalize(url: &str) -> Result<String, Error> {
        ensure_cdk!(!url.trim().is_empty(), Error::InvalidUrl);

        let parsed = Url::parse(url.trim())?;
        let host = parsed.host_str().ok_or(Error::InvalidUrl)?;

        let mut normalized = format!("{}://{}", parsed.scheme(), host);
        if let Some(port) = parsed.port() {
            normalized.push_str(&format!(":{port}"));
        }

        let path = parsed.path().trim_end_matches('/');
        if !path.is_empty() {
            normalized.push_str(path);
        }

        Ok(normalized)
    }

    /// Join onto url
    pub fn join(&self, path: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.0)?;
        let joined = format!("{}/{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        Ok(url)
    }

    /// Append path elements onto the URL
    pub fn join_paths(&self, path_elements: &[&str]) -> Result<Url, Error> {
        self.join(&path_elements.join("/"))
    }
}

impl FromStr for MintUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Self::normalize(url).map(Self)
    }
}

impl fmt::Display for MintUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MintUrl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MintUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MintUrl::from_str(&s).map_err(serde::de::Error::custom)
    }
}
