//! CDK claim engine
//!
//! Moves ecash into a user's accounts without ever losing or double spending
//! it: Lightning receive quotes locked with NUT-20, same mint token swaps,
//! cross mint claims bridged over Lightning, and the tracking that drives all
//! of them to a terminal state. Every state change goes through a versioned
//! write of the [`ClaimDatabase`](cdk_claim_common::ClaimDatabase), and every
//! output is derived deterministically (NUT-13) so a lost response is
//! recovered by restore (NUT-09).
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod claimability;
pub mod config;
pub mod error;
pub mod fees;
pub mod mint_connector;
pub mod orchestrator;
pub mod outputs;
pub mod receive;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod swap;
pub mod tracker;
mod util;

pub use cdk_claim_common as common;

pub use self::config::ClaimConfig;
pub use self::error::Error;
pub use self::orchestrator::{ClaimOutcome, Dispatch, PendingSummary, QuoteOrchestrator};
pub use self::receive::ReceiveQuoteService;
pub use self::registry::MintRegistry;
pub use self::resolver::{CrossMintQuote, CrossMintQuoter, ExchangeRate, TargetAmount};
pub use self::session::SessionContext;
pub use self::swap::TokenSwapService;
pub use self::tracker::{MintQuoteTracker, TrackedQuote, TrackerEvent, TrackingMode};
