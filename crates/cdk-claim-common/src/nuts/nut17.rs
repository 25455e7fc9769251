//! NUT-17: WebSocket subscriptions
//!
//! <https://github.com/cashubtc/nuts/blob/main/17.md>

use serde::{Deserialize, Serialize};

use super::nut00::{CurrencyUnit, PaymentMethod};
use super::nut04::MintQuoteBolt11Response;

/// JSON RPC version
pub const JSON_RPC_VERSION: &str = "2.0";

/// Subscription kind
#[derive(Debug, Clone, Copy, Eq, Ord, PartialOrd, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Bolt 11 Melt Quote
    Bolt11MeltQuote,
    /// Bolt 11 Mint Quote
    Bolt11MintQuote,
    /// Proof State
    ProofState,
}

impl Kind {
    /// Command name as advertised in mint info
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bolt11MeltQuote => "bolt11_melt_quote",
            Self::Bolt11MintQuote => "bolt11_mint_quote",
            Self::ProofState => "proof_state",
        }
    }
}

/// Check state Settings
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportedSettings {
    /// Supported methods
    #[serde(default)]
    pub supported: Vec<SupportedMethods>,
}

/// Supported WS Methods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportedMethods {
    /// Payment Method
    pub method: PaymentMethod,
    /// Unit
    pub unit: CurrencyUnit,
    /// Command
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Subscription Parameter according to the standard
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Deserialize)]
pub struct Params {
    /// Kind
    pub kind: Kind,
    /// Filters
    pub filters: Vec<String>,
    /// Subscription Id
    #[serde(rename = "subId")]
    pub id: String,
}

/// The request to unsubscribe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsUnsubscribeRequest {
    /// Subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// The inner method of the websocket request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "params")]
pub enum WsMethodRequest {
    /// Subscribe method
    Subscribe(Params),
    /// Unsubscribe method
    Unsubscribe(WsUnsubscribeRequest),
}

/// Websocket request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The method body
    #[serde(flatten)]
    pub method: WsMethodRequest,
    /// The request ID
    pub id: usize,
}

impl From<(WsMethodRequest, usize)> for WsRequest {
    fn from((method, id): (WsMethodRequest, usize)) -> Self {
        WsRequest {
            jsonrpc: JSON_RPC_VERSION.to_owned(),
            method,
            id,
        }
    }
}

/// The notification payload for a mint quote subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationInner {
    /// The subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
    /// The notification payload
    pub payload: MintQuoteBolt11Response,
}

/// Notification from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsNotification {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The method
    pub method: String,
    /// The parameters
    pub params: NotificationInner,
}

/// Websocket error
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WsErrorBody {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Websocket error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsErrorResponse {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The error
    pub error: WsErrorBody,
    /// The request ID
    pub id: usize,
}

/// Subscribe acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSubscribeResult {
    /// Status
    pub status: String,
    /// Subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// Websocket response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The result
    pub result: WsSubscribeResult,
    /// The request ID
    pub id: usize,
}

/// Message from the server to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessageOrResponse {
    /// A response to a request
    Response(WsResponse),
    /// An error response
    ErrorResponse(WsErrorResponse),
    /// A notification
    Notification(WsNotification),
}
