//! Mint interface

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::mint_url::MintUrl;
use crate::nuts::{
    Id, KeySet, KeysetResponse, MeltQuoteBolt11Request, MeltQuoteBolt11Response, MeltRequest,
    MintInfo, MintQuoteBolt11Request, MintQuoteBolt11Response, MintRequest, MintResponse,
    RestoreRequest, RestoreResponse, SwapRequest, SwapResponse,
};

/// Interface that connects the claim engine to a mint
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait MintConnector: Debug {
    /// Url of the mint
    fn mint_url(&self) -> &MintUrl;
    /// Get Mint Info [NUT-06]
    async fn get_mint_info(&self) -> Result<MintInfo, Error>;
    /// Get Keysets [NUT-02]
    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error>;
    /// Get Keyset Keys [NUT-01]
    async fn get_mint_keyset(&self, keyset_id: Id) -> Result<KeySet, Error>;
    /// Mint Quote [NUT-04]
    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error>;
    /// Mint Quote status
    async fn get_mint_quote_status(&self, quote_id: &str)
        -> Result<MintQuoteBolt11Response, Error>;
    /// Mint Tokens [NUT-04]
    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error>;
    /// Melt Quote [NUT-05]
    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error>;
    /// Melt [NUT-05]
    async fn post_melt(&self, request: MeltRequest) -> Result<MeltQuoteBolt11Response, Error>;
    /// Swap [NUT-03]
    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error>;
    /// Restore request [NUT-09]
    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error>;
    /// Subscribe to `bolt11_mint_quote` updates [NUT-17]
    async fn subscribe_mint_quotes(
        &self,
        quote_ids: Vec<String>,
    ) -> Result<MintQuoteSubscription, Error>;
}

/// Stream of mint quote updates
///
/// Dropping the subscription closes the channel, which the producer treats as
/// an unsubscribe.
#[derive(Debug)]
pub struct MintQuoteSubscription {
    id: String,
    receiver: mpsc::Receiver<Result<MintQuoteBolt11Response, Error>>,
}

impl MintQuoteSubscription {
    /// Create a subscription handle and the sender feeding it
    pub fn channel(
        id: impl Into<String>,
        buffer: usize,
    ) -> (
        mpsc::Sender<Result<MintQuoteBolt11Response, Error>>,
        Self,
    ) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            sender,
            Self {
                id: id.into(),
                receiver,
            },
        )
    }

    /// Subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next update, `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<Result<MintQuoteBolt11Response, Error>> {
        self.receiver.recv().await
    }
}
