//! Claim engine store interface
//!
//! Every write takes the versions the caller read and fails with
//! [`Error::VersionConflict`] when any of them is stale. Writes touching a
//! quote or swap and its account either both apply or neither does.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::nuts::Proofs;
use crate::token::TokenHash;
use crate::wallet::{
    CashuAccount, CreateReceiveQuote, CreateTokenSwap, OutputReservation,
    ProcessReceiveQuotePayment, ReceiveQuote, TokenSwap, Versioned,
};

/// Stored entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// Cashu account
    Account,
    /// Receive quote
    ReceiveQuote,
    /// Token swap
    TokenSwap,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::ReceiveQuote => write!(f, "receive quote"),
            Self::TokenSwap => write!(f, "token swap"),
        }
    }
}

/// Claim database error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Version presented by the writer is not the current row version
    #[error("Version conflict on {entity} `{id}`")]
    VersionConflict {
        /// Entity kind
        entity: Entity,
        /// Row id
        id: String,
    },
    /// Row does not exist
    #[error("{entity} `{id}` not found")]
    NotFound {
        /// Entity kind
        entity: Entity,
        /// Row id
        id: String,
    },
    /// Row already exists
    #[error("{entity} `{id}` already exists")]
    Duplicate {
        /// Entity kind
        entity: Entity,
        /// Row id
        id: String,
    },
    /// Write is not legal from the current state
    #[error("Invalid transition of {entity} `{id}` from {from}")]
    InvalidTransition {
        /// Entity kind
        entity: Entity,
        /// Row id
        id: String,
        /// Current state
        from: String,
    },
    /// Write would move a keyset counter backwards
    #[error("Keyset counter would decrease on account `{0}`")]
    CounterRegression(String),
    /// Amount error
    #[error(transparent)]
    Amount(#[from] crate::amount::Error),
    /// Database Error
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Optimistic lock failure, refetch and reconcile
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Row carried by a change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Account row
    Account(Versioned<CashuAccount>),
    /// Receive quote row
    ReceiveQuote(Versioned<ReceiveQuote>),
    /// Token swap row
    TokenSwap(Versioned<TokenSwap>),
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Row inserted
    Created(Row),
    /// Row written
    Updated(Row),
    /// Notification channel reconnected, events may have been missed
    Reconnected,
}

/// Persistent store of the claim engine
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ClaimDatabase: Debug {
    /// Get account
    async fn get_account(&self, account_id: &str)
        -> Result<Option<Versioned<CashuAccount>>, Error>;

    /// Accounts of user
    async fn get_user_accounts(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<CashuAccount>>, Error>;

    /// Reserve output counters that belong to no quote or swap of the account
    async fn reserve_account_counters(
        &self,
        account_id: &str,
        version: u32,
        outputs: &OutputReservation,
    ) -> Result<Versioned<CashuAccount>, Error>;

    /// Append proofs to the account
    async fn add_account_proofs(
        &self,
        account_id: &str,
        version: u32,
        proofs: Proofs,
    ) -> Result<Versioned<CashuAccount>, Error>;

    /// Get receive quote by local id
    async fn get_receive_quote(&self, id: &str) -> Result<Option<Versioned<ReceiveQuote>>, Error>;

    /// Receive quotes of user in `UNPAID` or `PAID`
    async fn get_pending_receive_quotes(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<ReceiveQuote>>, Error>;

    /// Receive quotes bridging a token claim, in any state, oldest first
    async fn get_receive_quotes_by_token_hash(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Vec<Versioned<ReceiveQuote>>, Error>;

    /// Insert a new `UNPAID` quote at version 0
    async fn create_receive_quote(
        &self,
        params: CreateReceiveQuote,
    ) -> Result<Versioned<ReceiveQuote>, Error>;

    /// `UNPAID -> EXPIRED`
    async fn expire_receive_quote(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Versioned<ReceiveQuote>, Error>;

    /// Non terminal `-> FAILED`
    async fn fail_receive_quote(
        &self,
        id: &str,
        version: u32,
        reason: String,
    ) -> Result<Versioned<ReceiveQuote>, Error>;

    /// `UNPAID -> PAID` and reserve the output counters on the account
    async fn process_receive_quote_payment(
        &self,
        params: ProcessReceiveQuotePayment,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error>;

    /// `PAID -> COMPLETED` and append proofs to the account
    async fn complete_receive_quote(
        &self,
        id: &str,
        quote_version: u32,
        proofs: Proofs,
        account_version: u32,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error>;

    /// Get token swap
    async fn get_token_swap(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<Versioned<TokenSwap>>, Error>;

    /// Token swaps of user in `PENDING`
    async fn get_pending_token_swaps(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<TokenSwap>>, Error>;

    /// Insert a new `PENDING` swap and reserve the output counters on the account
    async fn create_token_swap(
        &self,
        params: CreateTokenSwap,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error>;

    /// `PENDING -> COMPLETED` and append proofs to the account
    async fn complete_token_swap(
        &self,
        token_hash: &TokenHash,
        swap_version: u32,
        proofs: Proofs,
        account_version: u32,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error>;

    /// `PENDING -> FAILED`
    async fn fail_token_swap(
        &self,
        token_hash: &TokenHash,
        version: u32,
        reason: String,
    ) -> Result<Versioned<TokenSwap>, Error>;

    /// Change notifications
    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;
}
