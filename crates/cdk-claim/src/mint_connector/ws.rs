//! NUT-17 websocket subscription to mint quote updates

use cdk_claim_common::nuts::nut17::{
    Kind, Params, WsMessageOrResponse, WsMethodRequest, WsRequest, WsUnsubscribeRequest,
};
use cdk_claim_common::{Error, MintQuoteSubscription, MintUrl};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const SUBSCRIPTION_BUFFER: usize = 64;
const SUBSCRIBE_REQUEST_ID: usize = 0;
const UNSUBSCRIBE_REQUEST_ID: usize = 1;

fn ws_error(err: impl std::fmt::Display) -> Error {
    Error::Websocket(err.to_string())
}

/// Open a websocket, subscribe to `quote_ids` and forward updates
///
/// The connection task unsubscribes and closes once the returned
/// subscription is dropped. A lost connection closes the subscription.
pub(crate) async fn subscribe(
    mint_url: &MintUrl,
    quote_ids: Vec<String>,
) -> Result<MintQuoteSubscription, Error> {
    let mut url = mint_url.join_paths(&["v1", "ws"])?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| ws_error("could not set websocket scheme"))?;

    tracing::debug!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|err| {
        tracing::error!("Error connecting: {err:?}");
        ws_error(err)
    })?;
    tracing::debug!("Connected to {}", url);

    let (mut write, mut read) = ws_stream.split();

    let sub_id = uuid::Uuid::new_v4().to_string();
    let request: WsRequest = (
        WsMethodRequest::Subscribe(Params {
            kind: Kind::Bolt11MintQuote,
            filters: quote_ids,
            id: sub_id.clone(),
        }),
        SUBSCRIBE_REQUEST_ID,
    )
        .into();
    let request = serde_json::to_string(&request)?;
    write
        .send(Message::Text(request.into()))
        .await
        .map_err(ws_error)?;

    let (sender, subscription) = MintQuoteSubscription::channel(sub_id.clone(), SUBSCRIPTION_BUFFER);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sender.closed() => {
                    let request: WsRequest = (
                        WsMethodRequest::Unsubscribe(WsUnsubscribeRequest { sub_id: sub_id.clone() }),
                        UNSUBSCRIBE_REQUEST_ID,
                    )
                        .into();
                    if let Ok(request) = serde_json::to_string(&request) {
                        let _ = write.send(Message::Text(request.into())).await;
                    }
                    if let Err(err) = write.send(Message::Close(None)).await {
                        tracing::error!("Closing error {err:?}");
                    }
                    break;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(err)) => {
                            let _ = sender.send(Err(ws_error(err))).await;
                            break;
                        }
                        None => break,
                    };
                    let msg = match msg {
                        Message::Text(msg) => msg,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    let msg = match serde_json::from_str::<WsMessageOrResponse>(&msg) {
                        Ok(msg) => msg,
                        Err(_) => continue,
                    };

                    match msg {
                        WsMessageOrResponse::Notification(notification) => {
                            if notification.params.sub_id != sub_id {
                                continue;
                            }
                            if sender.send(Ok(notification.params.payload)).await.is_err() {
                                break;
                            }
                        }
                        WsMessageOrResponse::Response(response) => {
                            tracing::debug!("Received response from server: {:?}", response);
                        }
                        WsMessageOrResponse::ErrorResponse(error) => {
                            tracing::debug!("Received an error from server: {:?}", error);
                            let _ = sender.send(Err(ws_error(error.error.message))).await;
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("Subscription {} closed", sub_id);
    });

    Ok(subscription)
}
