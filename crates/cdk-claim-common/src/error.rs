//! Errors

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::nuts::Id;

/// Protocol and mint error
#[derive(Debug, Error)]
pub enum Error {
    /// Mint does not have a key for amount
    #[error("No Key for Amount")]
    AmountKey,
    /// Keyset is not known
    #[error("Keyset id not known: `{0}`")]
    KeysetUnknown(Id),
    /// Unsupported unit
    #[error("Unit unsupported")]
    UnsupportedUnit,
    /// Payment failed
    #[error("Payment failed")]
    PaymentFailed,
    /// Amount overflow
    #[error("Amount Overflow")]
    AmountOverflow,
    /// Witness missing or invalid
    #[error("Signature missing or invalid")]
    SignatureMissingOrInvalid,
    /// Minting is disabled
    #[error("Minting is disabled")]
    MintingDisabled,
    /// Quote is not known
    #[error("Unknown quote")]
    UnknownQuote,
    /// Quote is expired
    #[error("Expired quote: Expired: `{0}`, Time: `{1}`")]
    ExpiredQuote(u64, u64),
    /// Quote is not paid
    #[error("Quote not paid")]
    UnpaidQuote,
    /// Quote is pending
    #[error("Quote pending")]
    PendingQuote,
    /// ecash already issued for quote
    #[error("Quote already issued")]
    IssuedQuote,
    /// Keyset is not known
    #[error("Unknown Keyset")]
    UnknownKeySet,
    /// Keyset is inactive
    #[error("Inactive Keyset")]
    InactiveKeyset,
    /// Blinded Message is already signed
    #[error("Blinded Message is already signed")]
    BlindedMessageAlreadySigned,
    /// Transaction unbalanced
    #[error("Inputs: `{0}`, Outputs: `{1}`, Expected Fee: `{2}`")]
    TransactionUnbalanced(u64, u64, u64),
    /// Token is already spent
    #[error("Token Already Spent")]
    TokenAlreadySpent,
    /// Token is pending
    #[error("Token Pending")]
    TokenPending,
    /// Incorrect Mint
    #[error("Token does not match wallet mint")]
    IncorrectMint,
    /// Mint returned a response that does not match the request
    #[error("Invalid mint response: {0}")]
    InvalidMintResponse(String),
    /// Unknown error response
    #[error("Unknown error response: `{0}`")]
    UnknownErrorResponse(String),
    /// Http transport error
    #[error("HTTP error: {1}")]
    HttpError(Option<u16>, String),
    /// Mint asked us to slow down
    #[error("Rate limited by mint")]
    RateLimited,
    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,
    /// Websocket subscription error
    #[error("Websocket error: {0}")]
    Websocket(String),
    /// Custom Error
    #[error("`{0}`")]
    Custom(String),

    // External Error conversions
    /// Parse invalid url
    #[error(transparent)]
    MintUrl(#[from] crate::mint_url::Error),
    /// Serde Json error
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    /// Amount Error
    #[error(transparent)]
    Amount(#[from] crate::amount::Error),
    /// Secret error
    #[error(transparent)]
    Secret(#[from] crate::secret::Error),
    /// DHKE error
    #[error(transparent)]
    DHKE(#[from] crate::dhke::Error),
    /// Token error
    #[error(transparent)]
    Token(#[from] crate::token::Error),
    /// NUT00 Error
    #[error(transparent)]
    NUT00(#[from] crate::nuts::nut00::Error),
    /// NUT01 Error
    #[error(transparent)]
    NUT01(#[from] crate::nuts::nut01::Error),
    /// NUT02 Error
    #[error(transparent)]
    NUT02(#[from] crate::nuts::nut02::Error),
    /// NUT04 Error
    #[error(transparent)]
    NUT04(#[from] crate::nuts::nut04::Error),
    /// NUT10 Error
    #[error(transparent)]
    NUT10(#[from] crate::nuts::nut10::Error),
    /// NUT11 Error
    #[error(transparent)]
    NUT11(#[from] crate::nuts::nut11::Error),
    /// NUT13 Error
    #[error(transparent)]
    NUT13(#[from] crate::nuts::nut13::Error),
    /// NUT20 Error
    #[error(transparent)]
    NUT20(#[from] crate::nuts::nut20::Error),
}

impl Error {
    /// Mint rejected the request without applying it
    ///
    /// A quote or swap may be failed locally only on a definitive failure.
    /// Anything else leaves the mint state unknown and is resolved by a
    /// status check or restore.
    pub fn is_definitive_failure(&self) -> bool {
        match self {
            Self::AmountKey
            | Self::KeysetUnknown(_)
            | Self::UnsupportedUnit
            | Self::PaymentFailed
            | Self::AmountOverflow
            | Self::SignatureMissingOrInvalid
            | Self::MintingDisabled
            | Self::UnknownQuote
            | Self::ExpiredQuote(_, _)
            | Self::UnpaidQuote
            | Self::PendingQuote
            | Self::IssuedQuote
            | Self::UnknownKeySet
            | Self::InactiveKeyset
            | Self::BlindedMessageAlreadySigned
            | Self::TransactionUnbalanced(_, _, _)
            | Self::TokenAlreadySpent
            | Self::TokenPending
            | Self::IncorrectMint => true,

            // Client errors (400-499) are definitive failures
            // Server errors (500-599) are ambiguous
            Self::HttpError(Some(status), _) => (400..500).contains(status),

            Self::HttpError(None, _)
            | Self::RateLimited
            | Self::Timeout
            | Self::Websocket(_)
            | Self::UnknownErrorResponse(_)
            | Self::InvalidMintResponse(_)
            | Self::SerdeJsonError(_) => false,

            Self::MintUrl(_)
            | Self::Amount(_)
            | Self::Secret(_)
            | Self::DHKE(_)
            | Self::Token(_)
            | Self::NUT00(_)
            | Self::NUT01(_)
            | Self::NUT02(_)
            | Self::NUT04(_)
            | Self::NUT10(_)
            | Self::NUT11(_)
            | Self::NUT13(_)
            | Self::NUT20(_) => true,

            Self::Custom(_) => false,
        }
    }
}

/// Error body returned by a mint
///
/// See [NUT-00](https://github.com/cashubtc/nuts/blob/main/00.md#errors)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error Code
    pub code: ErrorCode,
    /// Human readable description
    #[serde(default)]
    pub detail: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, detail: {}", self.code, self.detail)
    }
}

impl ErrorResponse {
    /// Create new [`ErrorResponse`]
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// Error response from json
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;

        Self::from_value(value)
    }

    /// Error response from json Value
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match serde_json::from_value::<ErrorResponse>(value.clone()) {
            Ok(res) => Ok(res),
            Err(_) => Ok(Self {
                code: ErrorCode::Unknown(999),
                detail: value.to_string(),
            }),
        }
    }
}

impl From<ErrorResponse> for Error {
    fn from(err: ErrorResponse) -> Error {
        match err.code {
            ErrorCode::TokenNotVerified => Self::DHKE(crate::dhke::Error::TokenNotVerified),
            ErrorCode::TokenAlreadySpent => Self::TokenAlreadySpent,
            ErrorCode::TokenPending => Self::TokenPending,
            ErrorCode::BlindedMessageAlreadySigned => Self::BlindedMessageAlreadySigned,
            ErrorCode::OutputsPending => Self::TokenPending,
            ErrorCode::TransactionUnbalanced => Self::TransactionUnbalanced(0, 0, 0),
            ErrorCode::UnsupportedUnit => Self::UnsupportedUnit,
            ErrorCode::KeysetNotFound => Self::UnknownKeySet,
            ErrorCode::KeysetInactive => Self::InactiveKeyset,
            ErrorCode::QuoteNotPaid => Self::UnpaidQuote,
            ErrorCode::TokensAlreadyIssued => Self::IssuedQuote,
            ErrorCode::MintingDisabled => Self::MintingDisabled,
            ErrorCode::LightningError => Self::PaymentFailed,
            ErrorCode::QuotePending => Self::PendingQuote,
            ErrorCode::QuoteExpired => Self::ExpiredQuote(0, 0),
            ErrorCode::WitnessMissingOrInvalid => Self::SignatureMissingOrInvalid,
            ErrorCode::Unknown(_) => Self::UnknownErrorResponse(err.to_string()),
        }
    }
}

/// Possible Error Codes
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ErrorCode {
    // 10xxx - Proof/Token verification errors
    /// Proof verification failed (10001)
    TokenNotVerified,

    // 11xxx - Input/Output errors
    /// Proofs already spent (11001)
    TokenAlreadySpent,
    /// Proofs are pending (11002)
    TokenPending,
    /// Outputs already signed (11003)
    BlindedMessageAlreadySigned,
    /// Outputs are pending (11004)
    OutputsPending,
    /// Transaction is not balanced (11005)
    TransactionUnbalanced,
    /// Unit in request is not supported (11013)
    UnsupportedUnit,

    // 12xxx - Keyset errors
    /// Keyset is not known (12001)
    KeysetNotFound,
    /// Keyset is inactive, cannot sign messages (12002)
    KeysetInactive,

    // 20xxx - Quote/Payment errors
    /// Quote request is not paid (20001)
    QuoteNotPaid,
    /// Quote has already been issued (20002)
    TokensAlreadyIssued,
    /// Minting is disabled (20003)
    MintingDisabled,
    /// Lightning payment failed (20004)
    LightningError,
    /// Quote is pending (20005)
    QuotePending,
    /// Quote is expired (20007)
    QuoteExpired,
    /// Witness missing or invalid (20008)
    WitnessMissingOrInvalid,

    /// Unknown error code
    Unknown(u16),
}

impl ErrorCode {
    /// Error code from u16
    pub fn from_code(code: u16) -> Self {
        match code {
            10001 => Self::TokenNotVerified,
            11001 => Self::TokenAlreadySpent,
            11002 => Self::TokenPending,
            11003 => Self::BlindedMessageAlreadySigned,
            11004 => Self::OutputsPending,
            11005 => Self::TransactionUnbalanced,
            11013 => Self::UnsupportedUnit,
            12001 => Self::KeysetNotFound,
            12002 => Self::KeysetInactive,
            20001 => Self::QuoteNotPaid,
            20002 => Self::TokensAlreadyIssued,
            20003 => Self::MintingDisabled,
            20004 => Self::LightningError,
            20005 => Self::QuotePending,
            20007 => Self::QuoteExpired,
            20008 => Self::WitnessMissingOrInvalid,
            _ => Self::Unknown(code),
        }
    }

    /// Error code to u16
    pub fn to_code(&self) -> u16 {
        match self {
            Self::TokenNotVerified => 10001,
            Self::TokenAlreadySpent => 11001,
            Self::TokenPending => 11002,
            Self::BlindedMessageAlreadySigned => 11003,
            Self::OutputsPending => 11004,
            Self::TransactionUnbalanced => 11005,
            Self::UnsupportedUnit => 11013,
            Self::KeysetNotFound => 12001,
            Self::KeysetInactive => 12002,
            Self::QuoteNotPaid => 20001,
            Self::TokensAlreadyIssued => 20002,
            Self::MintingDisabled => 20003,
            Self::LightningError => 20004,
            Self::QuotePending => 20005,
            Self::QuoteExpired => 20007,
            Self::WitnessMissingOrInvalid => 20008,
            Self::Unknown(code) => *code,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.to_code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u16::deserialize(deserializer)?;

        Ok(ErrorCode::from_code(code))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_definitive_failure() {
        assert!(Error::AmountOverflow.is_definitive_failure());
        assert!(Error::TokenAlreadySpent.is_definitive_failure());
        assert!(Error::MintingDisabled.is_definitive_failure());

        assert!(Error::HttpError(Some(400), "Bad Request".to_string()).is_definitive_failure());
        assert!(Error::HttpError(Some(404), "Not Found".to_string()).is_definitive_failure());

        assert!(!Error::Timeout.is_definitive_failure());
        assert!(!Error::Websocket("closed".to_string()).is_definitive_failure());
        assert!(!Error::RateLimited.is_definitive_failure());

        assert!(
            !Error::HttpError(Some(500), "Internal Server Error".to_string())
                .is_definitive_failure()
        );
        assert!(!Error::HttpError(Some(502), "Bad Gateway".to_string()).is_definitive_failure());
        assert!(!Error::HttpError(None, "Connection refused".to_string()).is_definitive_failure());
    }

    #[test]
    fn test_error_response_mapping() {
        let response = ErrorResponse::from_json(r#"{"code":11003,"detail":"outputs have already been signed before."}"#)
            .unwrap();
        assert_eq!(response.code, ErrorCode::BlindedMessageAlreadySigned);
        assert!(matches!(
            Error::from(response),
            Error::BlindedMessageAlreadySigned
        ));

        let response = ErrorResponse::from_json(r#"{"code":20002,"detail":"quote already issued"}"#).unwrap();
        assert!(matches!(Error::from(response), Error::IssuedQuote));

        let unknown = ErrorResponse::from_json(r#"{"code":42,"detail":"weird"}"#).unwrap();
        assert_eq!(unknown.code, ErrorCode::Unknown(42));
        assert!(matches!(
            Error::from(unknown),
            Error::UnknownErrorResponse(_)
        ));

        let not_an_error = ErrorResponse::from_json(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(not_an_error.code, ErrorCode::Unknown(999));
        assert!(not_an_error.detail.contains("boom"));
    }
}
