//! Fault injection

use cdk_claim_common::{Error, ErrorResponse};

/// Mint endpoints faults can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `GET /v1/info`
    Info,
    /// `GET /v1/keysets` and `GET /v1/keys/{id}`
    Keysets,
    /// `POST /v1/mint/quote/bolt11`
    MintQuote,
    /// `GET /v1/mint/quote/bolt11/{id}`
    MintQuoteStatus,
    /// `POST /v1/mint/bolt11`
    Mint,
    /// `POST /v1/melt/quote/bolt11`
    MeltQuote,
    /// `POST /v1/melt/bolt11`
    Melt,
    /// `POST /v1/swap`
    Swap,
    /// `POST /v1/restore`
    Restore,
    /// NUT-17 `bolt11_mint_quote` subscription
    Subscribe,
}

/// One shot failure of the next call to an endpoint
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without processing the request
    Reject(ErrorResponse),
    /// Process the request, then answer with an error response
    ProcessThenReject(ErrorResponse),
    /// Process the request, then lose the response
    DropResponse,
    /// Answer with HTTP 429
    RateLimit,
    /// Fail with a transport error without processing
    Unreachable,
}

impl Fault {
    /// Whether the mint applies the request before failing
    pub(crate) fn processes_request(&self) -> bool {
        matches!(self, Self::ProcessThenReject(_) | Self::DropResponse)
    }

    pub(crate) fn into_error(self) -> Error {
        match self {
            Self::Reject(response) | Self::ProcessThenReject(response) => Error::from(response),
            Self::DropResponse => Error::HttpError(None, "connection reset by peer".to_string()),
            Self::RateLimit => Error::RateLimited,
            Self::Unreachable => Error::HttpError(None, "connection refused".to_string()),
        }
    }
}
