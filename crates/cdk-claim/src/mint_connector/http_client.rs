//! HTTP mint client

use std::time::Duration;

use async_trait::async_trait;
use cdk_claim_common::{
    Error, ErrorResponse, Id, KeySet, KeysResponse, KeysetResponse, MeltQuoteBolt11Request,
    MeltQuoteBolt11Response, MeltRequest, MintInfo, MintQuoteBolt11Request,
    MintQuoteBolt11Response, MintRequest, MintResponse, MintUrl, RestoreRequest, RestoreResponse,
    SwapRequest, SwapResponse,
};
use reqwest::{Client, IntoUrl, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use super::{MintConnector, MintQuoteSubscription};

/// Request timeout of mint calls
#[cfg(not(target_arch = "wasm32"))]
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::Timeout;
    }
    Error::HttpError(
        err.status().map(|status_code| status_code.as_u16()),
        err.to_string(),
    )
}

#[derive(Debug, Clone)]
struct HttpClientCore {
    inner: Client,
}

impl HttpClientCore {
    fn new() -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        let inner = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        #[cfg(target_arch = "wasm32")]
        let inner = Client::new();

        Self { inner }
    }

    fn client(&self) -> &Client {
        &self.inner
    }

    async fn http_get<U: IntoUrl + Send, R: DeserializeOwned>(&self, url: U) -> Result<R, Error> {
        let response = self
            .client()
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        Self::parse(response).await
    }

    async fn http_post<U: IntoUrl + Send, P: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: U,
        payload: &P,
    ) -> Result<R, Error> {
        let response = self
            .client()
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        Self::parse(response).await
    }

    /// Decode the body, falling back to a NUT error response
    async fn parse<R: DeserializeOwned>(response: Response) -> Result<R, Error> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }

        let response = response.text().await.map_err(transport_error)?;

        serde_json::from_str::<R>(&response).map_err(|err| {
            tracing::warn!("Http Response error: {}", err);
            match ErrorResponse::from_json(&response) {
                Ok(ok) => <ErrorResponse as Into<Error>>::into(ok),
                Err(_) if !status.is_success() => {
                    Error::HttpError(Some(status.as_u16()), response.clone())
                }
                Err(err) => err.into(),
            }
        })
    }
}

/// Http Client
#[derive(Debug, Clone)]
pub struct HttpClient {
    core: HttpClientCore,
    mint_url: MintUrl,
}

impl HttpClient {
    /// Create new [`HttpClient`]
    pub fn new(mint_url: MintUrl) -> Self {
        Self {
            core: HttpClientCore::new(),
            mint_url,
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnector for HttpClient {
    fn mint_url(&self) -> &MintUrl {
        &self.mint_url
    }

    /// Get Mint Info [NUT-06]
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        let url = self.mint_url.join_paths(&["v1", "info"])?;
        self.core.http_get(url).await
    }

    /// Get Keysets [NUT-02]
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error> {
        let url = self.mint_url.join_paths(&["v1", "keysets"])?;
        self.core.http_get(url).await
    }

    /// Get Keyset Keys [NUT-01]
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_mint_keyset(&self, keyset_id: Id) -> Result<KeySet, Error> {
        let url = self
            .mint_url
            .join_paths(&["v1", "keys", &keyset_id.to_string()])?;

        let keys_response = self.core.http_get::<_, KeysResponse>(url).await?;

        keys_response
            .keysets
            .into_iter()
            .next()
            .ok_or(Error::KeysetUnknown(keyset_id))
    }

    /// Mint Quote [NUT-04]
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        let url = self
            .mint_url
            .join_paths(&["v1", "mint", "quote", "bolt11"])?;
        self.core.http_post(url, &request).await
    }

    /// Mint Quote status
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_mint_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MintQuoteBolt11Response, Error> {
        let url = self
            .mint_url
            .join_paths(&["v1", "mint", "quote", "bolt11", quote_id])?;
        self.core.http_get(url).await
    }

    /// Mint Tokens [NUT-04]
    #[instrument(skip(self, request), fields(mint_url = %self.mint_url))]
    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error> {
        let url = self.mint_url.join_paths(&["v1", "mint", "bolt11"])?;
        self.core.http_post(url, &request).await
    }

    /// Melt Quote [NUT-05]
    #[instrument(skip(self, request), fields(mint_url = %self.mint_url))]
    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        let url = self
            .mint_url
            .join_paths(&["v1", "melt", "quote", "bolt11"])?;
        self.core.http_post(url, &request).await
    }

    /// Melt [NUT-05]
    #[instrument(skip(self, request), fields(mint_url = %self.mint_url))]
    async fn post_melt(&self, request: MeltRequest) -> Result<MeltQuoteBolt11Response, Error> {
        let url = self.mint_url.join_paths(&["v1", "melt", "bolt11"])?;
        self.core.http_post(url, &request).await
    }

    /// Swap Token [NUT-03]
    #[instrument(skip(self, swap_request), fields(mint_url = %self.mint_url))]
    async fn post_swap(&self, swap_request: SwapRequest) -> Result<SwapResponse, Error> {
        let url = self.mint_url.join_paths(&["v1", "swap"])?;
        self.core.http_post(url, &swap_request).await
    }

    /// Restore request [NUT-09]
    #[instrument(skip(self, request), fields(mint_url = %self.mint_url))]
    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error> {
        let url = self.mint_url.join_paths(&["v1", "restore"])?;
        self.core.http_post(url, &request).await
    }

    /// Subscribe to mint quote updates [NUT-17]
    #[cfg(not(target_arch = "wasm32"))]
    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn subscribe_mint_quotes(
        &self,
        quote_ids: Vec<String>,
    ) -> Result<MintQuoteSubscription, Error> {
        super::ws::subscribe(&self.mint_url, quote_ids).await
    }

    /// Websockets are not available on wasm, quotes are polled
    #[cfg(target_arch = "wasm32")]
    async fn subscribe_mint_quotes(
        &self,
        _quote_ids: Vec<String>,
    ) -> Result<MintQuoteSubscription, Error> {
        Err(Error::Websocket("not supported".to_string()))
    }
}
