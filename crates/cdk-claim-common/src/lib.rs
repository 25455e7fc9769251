//! Shared types of the CDK claim engine.
//!
//! Protocol primitives, claim records, and the store and mint interfaces that
//! the claim engine, its storage backends and test mints all build on.

pub mod amount;
pub mod connector;
pub mod database;
pub mod dhke;
pub mod error;
pub mod mint_url;
pub mod nuts;
pub mod secret;
pub mod token;
pub mod util;
pub mod wallet;

// re-exporting external crates
pub use bitcoin;

pub use self::amount::Amount;
pub use self::connector::{MintConnector, MintQuoteSubscription};
pub use self::database::ClaimDatabase;
pub use self::error::{Error, ErrorCode, ErrorResponse};
pub use self::mint_url::MintUrl;
pub use self::nuts::*;
pub use self::token::{Token, TokenHash};
pub use self::util::SECP256K1;
