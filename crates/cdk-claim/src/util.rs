//! Utilities

use std::future::Future;

use cdk_claim_common::wallet::{CashuAccount, Versioned};
use cdk_claim_common::ClaimDatabase;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Run `fut` unless `cancel` fires first
///
/// Only wraps reads and the reservation write. Mint calls and the final
/// write of a lifecycle run to completion.
pub(crate) async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Current row of an account
pub(crate) async fn fetch_account(
    db: &(dyn ClaimDatabase + Send + Sync),
    account_id: &str,
) -> Result<Versioned<CashuAccount>, Error> {
    db.get_account(account_id)
        .await?
        .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))
}
