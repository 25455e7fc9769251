//! Mint connectors
//!
//! [`HttpClient`] talks to a mint over its `/v1` HTTP API and, off wasm,
//! opens NUT-17 websocket subscriptions for mint quote updates.

pub use cdk_claim_common::connector::{MintConnector, MintQuoteSubscription};

pub mod http_client;
#[cfg(not(target_arch = "wasm32"))]
mod ws;

pub use self::http_client::HttpClient;
