//! Claim engine records
//!
//! States carry the fields that only exist in that state, so an `UNPAID`
//! quote has no keyset counter to read.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use bitcoin::bip32::DerivationPath;
use serde::{Deserialize, Serialize};

use crate::mint_url::MintUrl;
use crate::nuts::{CurrencyUnit, Id, Proofs, ProofsMethods};
use crate::token::TokenHash;
use crate::Amount;

/// A row value together with the store version it was read at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Value
    #[serde(flatten)]
    pub value: T,
    /// Row version, bumped by every write
    pub version: u32,
}

impl<T> Versioned<T> {
    /// Wrap value read at `version`
    pub fn new(value: T, version: u32) -> Self {
        Self { value, version }
    }

    /// Unwrap the value
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Currency an account is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Bitcoin
    Btc,
    /// US Dollar
    Usd,
}

impl Currency {
    /// Unit ecash of this currency is issued in
    pub fn default_unit(&self) -> CurrencyUnit {
        match self {
            Self::Btc => CurrencyUnit::Sat,
            Self::Usd => CurrencyUnit::Usd,
        }
    }

    /// Currency of a mint unit
    pub fn from_unit(unit: &CurrencyUnit) -> Option<Self> {
        match unit {
            CurrencyUnit::Sat | CurrencyUnit::Msat => Some(Self::Btc),
            CurrencyUnit::Usd => Some(Self::Usd),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Btc => write!(f, "BTC"),
            Self::Usd => write!(f, "USD"),
        }
    }
}

/// Cashu account, one per (user, mint, currency)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashuAccount {
    /// Account id
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Mint the proofs are issued by
    pub mint_url: MintUrl,
    /// Currency
    pub currency: Currency,
    /// Unit
    pub unit: CurrencyUnit,
    /// Spendable proofs
    pub proofs: Proofs,
    /// Next unused deterministic counter per keyset
    #[serde(default)]
    pub keyset_counters: HashMap<Id, u32>,
}

impl CashuAccount {
    /// Next unused counter for keyset
    pub fn counter(&self, keyset_id: &Id) -> u32 {
        self.keyset_counters.get(keyset_id).copied().unwrap_or(0)
    }

    /// Sum of spendable proofs
    pub fn balance(&self) -> Result<Amount, crate::nuts::nut00::Error> {
        self.proofs.total_amount()
    }
}

/// Deterministic outputs committed before a mint or swap call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputReservation {
    /// Keyset the outputs are derived for
    pub keyset_id: Id,
    /// Counter of the first output
    pub keyset_counter: u32,
    /// Output amounts in derivation order
    pub output_amounts: Vec<Amount>,
}

impl OutputReservation {
    /// Number of counters the reservation consumes
    pub fn count(&self) -> u32 {
        u32::try_from(self.output_amounts.len()).unwrap_or(u32::MAX)
    }

    /// Counter following the last reserved one
    pub fn next_counter(&self) -> u32 {
        self.keyset_counter.saturating_add(self.count())
    }

    /// Sum of output amounts
    pub fn total_amount(&self) -> Result<Amount, crate::amount::Error> {
        Amount::try_sum(self.output_amounts.iter().copied())
    }
}

/// How a receive quote came to exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiveQuoteKind {
    /// Invoice handed to an external payer
    Lightning,
    /// Bridging leg of a cross-mint token claim, paid by melting the token
    CashuToken {
        /// Mint the token was issued by
        source_mint_url: MintUrl,
        /// Melt quote at the source mint paying this quote
        melt_quote_id: String,
        /// Claimed token
        token_hash: TokenHash,
        /// Change outputs attached to the melt
        #[serde(default, skip_serializing_if = "Option::is_none")]
        change: Option<MeltChange>,
    },
}

/// NUT-08 blank outputs of a bridging melt
///
/// Change is issued by the source mint, so it lands on the user's account at
/// that mint and unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltChange {
    /// Account at the source mint credited with the change
    pub account_id: String,
    /// Reserved blank outputs
    pub outputs: OutputReservation,
}

/// Receive quote state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum ReceiveQuoteState {
    /// Waiting for the invoice to be paid
    Unpaid,
    /// Paid, outputs reserved
    Paid(OutputReservation),
    /// Proofs minted and stored on the account
    Completed(OutputReservation),
    /// Expired unpaid
    Expired,
    /// Failed
    Failed {
        /// Failure reason
        reason: String,
    },
}

/// State label without state data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiveQuoteStatus {
    /// Unpaid
    Unpaid,
    /// Paid
    Paid,
    /// Completed
    Completed,
    /// Expired
    Expired,
    /// Failed
    Failed,
}

impl ReceiveQuoteStatus {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Failed)
    }
}

impl fmt::Display for ReceiveQuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl ReceiveQuoteState {
    /// State label
    pub fn status(&self) -> ReceiveQuoteStatus {
        match self {
            Self::Unpaid => ReceiveQuoteStatus::Unpaid,
            Self::Paid(_) => ReceiveQuoteStatus::Paid,
            Self::Completed(_) => ReceiveQuoteStatus::Completed,
            Self::Expired => ReceiveQuoteStatus::Expired,
            Self::Failed { .. } => ReceiveQuoteStatus::Failed,
        }
    }
}

/// Lightning-locked mint quote owned by the receive lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveQuote {
    /// Local id
    pub id: String,
    /// Mint assigned quote id
    pub quote_id: String,
    /// Account the proofs are credited to
    pub account_id: String,
    /// Owning user
    pub user_id: String,
    /// Destination mint
    pub mint_url: MintUrl,
    /// Amount to mint
    pub amount: Amount,
    /// Currency
    pub currency: Currency,
    /// Unit
    pub unit: CurrencyUnit,
    /// bolt11 invoice
    pub payment_request: String,
    /// Full path of the key that unlocks the NUT-20 quote
    pub locking_derivation_path: DerivationPath,
    /// Unix timestamp after which the mint stops honoring the quote
    pub expires_at: u64,
    /// Memo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Origin of the quote
    pub kind: ReceiveQuoteKind,
    /// Unix timestamp of creation
    pub created_at: u64,
    /// State
    #[serde(flatten)]
    pub state: ReceiveQuoteState,
}

impl ReceiveQuote {
    /// State label
    pub fn status(&self) -> ReceiveQuoteStatus {
        self.state.status()
    }

    /// Reserved outputs, present once paid
    pub fn outputs(&self) -> Option<&OutputReservation> {
        match &self.state {
            ReceiveQuoteState::Paid(outputs) | ReceiveQuoteState::Completed(outputs) => {
                Some(outputs)
            }
            _ => None,
        }
    }

    /// Quote is past its expiry at `now`
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Token swap state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum TokenSwapState {
    /// Outputs reserved, swap not yet confirmed
    Pending,
    /// Proofs stored on the account
    Completed,
    /// Failed
    Failed {
        /// Failure reason
        reason: String,
    },
}

/// State label without state data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenSwapStatus {
    /// Pending
    Pending,
    /// Completed
    Completed,
    /// Failed
    Failed,
}

impl TokenSwapStatus {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TokenSwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Claim of one inbound token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSwap {
    /// Idempotency key and id
    pub token_hash: TokenHash,
    /// Untrusted input proofs
    pub token_proofs: Proofs,
    /// Account the proofs are credited to
    pub account_id: String,
    /// Owning user
    pub user_id: String,
    /// Mint of the token and the account
    pub mint_url: MintUrl,
    /// Unit
    pub unit: CurrencyUnit,
    /// Amount received, token amount less input fee
    pub amount: Amount,
    /// Input fee charged by the mint
    #[serde(default)]
    pub fee: Amount,
    /// Outputs committed before the swap call
    pub outputs: OutputReservation,
    /// Unix timestamp of creation
    pub created_at: u64,
    /// State
    #[serde(flatten)]
    pub state: TokenSwapState,
}

impl TokenSwap {
    /// State label
    pub fn status(&self) -> TokenSwapStatus {
        match self.state {
            TokenSwapState::Pending => TokenSwapStatus::Pending,
            TokenSwapState::Completed => TokenSwapStatus::Completed,
            TokenSwapState::Failed { .. } => TokenSwapStatus::Failed,
        }
    }
}

/// Parameters of a new receive quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReceiveQuote {
    /// Mint assigned quote id
    pub quote_id: String,
    /// Account
    pub account_id: String,
    /// User
    pub user_id: String,
    /// Destination mint
    pub mint_url: MintUrl,
    /// Amount
    pub amount: Amount,
    /// Currency
    pub currency: Currency,
    /// Unit
    pub unit: CurrencyUnit,
    /// bolt11 invoice
    pub payment_request: String,
    /// Locking key path
    pub locking_derivation_path: DerivationPath,
    /// Expiry
    pub expires_at: u64,
    /// Memo
    pub description: Option<String>,
    /// Origin
    pub kind: ReceiveQuoteKind,
}

/// Atomic quote `UNPAID -> PAID` and account counter reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReceiveQuotePayment {
    /// Local quote id
    pub quote_id: String,
    /// Quote version read by the caller
    pub quote_version: u32,
    /// Reserved outputs
    pub outputs: OutputReservation,
    /// Account version read by the caller
    pub account_version: u32,
}

/// Parameters of a new token swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTokenSwap {
    /// Idempotency key
    pub token_hash: TokenHash,
    /// Input proofs
    pub token_proofs: Proofs,
    /// Account
    pub account_id: String,
    /// User
    pub user_id: String,
    /// Mint
    pub mint_url: MintUrl,
    /// Unit
    pub unit: CurrencyUnit,
    /// Amount received
    pub amount: Amount,
    /// Input fee
    pub fee: Amount,
    /// Reserved outputs
    pub outputs: OutputReservation,
    /// Account version read by the caller
    pub account_version: u32,
}
