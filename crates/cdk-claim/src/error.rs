//! Claim engine errors

use cdk_claim_common::database;
use cdk_claim_common::wallet::{ReceiveQuoteStatus, TokenSwapStatus};
use cdk_claim_common::{Amount, MintUrl};
use thiserror::Error;

/// Claim engine Error
#[derive(Debug, Error)]
pub enum Error {
    /// Operation is not legal in the current quote state
    #[error("Receive quote `{id}` is {status}")]
    InvalidQuoteState {
        /// Local quote id
        id: String,
        /// Current state
        status: ReceiveQuoteStatus,
    },
    /// Operation is not legal in the current swap state
    #[error("Token swap `{id}` is {status}")]
    InvalidSwapState {
        /// Token hash
        id: String,
        /// Current state
        status: TokenSwapStatus,
    },
    /// Quote expired before it was paid
    #[error("Receive quote `{0}` expired")]
    QuoteExpired(String),
    /// Quote can not be expired yet
    #[error("Receive quote `{0}` has not reached its expiry")]
    QuoteNotExpired(String),
    /// Mint has not been paid for the quote yet
    #[error("Receive quote `{0}` is not paid")]
    QuoteNotPaid(String),
    /// Mint rejected the swap
    #[error("Swap failed: {0}")]
    SwapFailed(String),
    /// None of the proofs can be claimed
    #[error("Cannot claim token: {0}")]
    CannotClaim(String),
    /// Token mint does not match the account mint
    #[error("Token mint does not match account mint")]
    IncorrectMint,
    /// Account of the operation does not own the quote or swap
    #[error("Account `{0}` does not own this claim")]
    AccountMismatch(String),
    /// Unit is not supported by the mint or account
    #[error("Unsupported unit")]
    UnsupportedUnit,
    /// Amount left after fees and conversion is below one unit
    #[error("Amount too small")]
    AmountTooSmall,
    /// Cross mint quote resolution ran out of attempts
    #[error("No valid quotes found")]
    NoValidQuotes,
    /// Restore did not return all reserved outputs
    #[error("Restore returned {found} of {expected}")]
    RestoreIncomplete {
        /// Amount of reserved outputs
        expected: Amount,
        /// Amount restored
        found: Amount,
    },
    /// Session was torn down
    #[error("Session closed")]
    SessionClosed,
    /// Operation cancelled before commit
    #[error("Operation cancelled")]
    Cancelled,
    /// Mint is not registered
    #[error("Unknown mint `{0}`")]
    UnknownMint(MintUrl),
    /// Account does not exist
    #[error("Account `{0}` not found")]
    AccountNotFound(String),
    /// Mint has no active keyset for the unit
    #[error("No active keyset")]
    NoActiveKeyset,
    /// Exchange rate is not positive and finite
    #[error("Invalid exchange rate")]
    InvalidExchangeRate,

    /// Cashu protocol error
    #[error(transparent)]
    Cashu(#[from] cdk_claim_common::Error),
    /// Database error
    #[error(transparent)]
    Database(#[from] database::Error),
    /// Token error
    #[error(transparent)]
    Token(#[from] cdk_claim_common::token::Error),
    /// NUT13 error
    #[error(transparent)]
    NUT13(#[from] cdk_claim_common::nuts::nut13::Error),
    /// DHKE error
    #[error(transparent)]
    DHKE(#[from] cdk_claim_common::dhke::Error),
    /// Amount error
    #[error(transparent)]
    Amount(#[from] cdk_claim_common::amount::Error),
    /// NUT00 error
    #[error(transparent)]
    NUT00(#[from] cdk_claim_common::nuts::nut00::Error),
    /// Bip32 error
    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
    /// Config error
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Url error
    #[error(transparent)]
    MintUrl(#[from] cdk_claim_common::mint_url::Error),
}

impl Error {
    /// Optimistic lock failure, refetch and reconcile
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Database(err) if err.is_version_conflict())
    }

    /// Retrying later with fresh state may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => err.is_version_conflict(),
            Self::Cashu(err) => !err.is_definitive_failure(),
            Self::QuoteNotPaid(_) | Self::RestoreIncomplete { .. } => true,
            _ => false,
        }
    }
}
