//! Receive quote lifecycle
//!
//! Owns one NUT-20 locked mint quote from creation to minted proofs.
//!
//! ```text
//! create() -> UNPAID
//!   └─> complete()
//!         ├─ UNPAID: reserve outputs, UNPAID -> PAID   (one versioned write)
//!         └─ PAID:   mint (or restore), PAID -> COMPLETED (one versioned write)
//! UNPAID -> EXPIRED   mark_expired(), once past expiry
//! * -> FAILED         mark_failed(), from any non terminal state
//! ```
//!
//! Counters are reserved on the account in the same write that marks the
//! quote paid, so a retry after a crash derives the same outputs and never
//! reuses a counter.

use std::sync::Arc;

use bitcoin::bip32::DerivationPath;
use cdk_claim_common::util::unix_time;
use cdk_claim_common::wallet::{
    CashuAccount, CreateReceiveQuote, ProcessReceiveQuotePayment, ReceiveQuote, ReceiveQuoteKind,
    ReceiveQuoteStatus, Versioned,
};
use cdk_claim_common::{
    Amount, ClaimDatabase, Error as CashuError, MintQuoteBolt11Request, MintQuoteBolt11Response,
    MintRequest, Proofs, QuoteState,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::ClaimConfig;
use crate::outputs::{construct, derive_outputs, is_already_issued, recover_reservation, reservation};
use crate::registry::MintRegistry;
use crate::session::SessionContext;
use crate::util::{cancellable, fetch_account};
use crate::Error;

/// Receive quote lifecycle
#[derive(Debug, Clone)]
pub struct ReceiveQuoteService {
    db: Arc<dyn ClaimDatabase + Send + Sync>,
    registry: MintRegistry,
    session: SessionContext,
    conflict_retries: u32,
}

impl ReceiveQuoteService {
    /// Create new [`ReceiveQuoteService`]
    pub fn new(
        db: Arc<dyn ClaimDatabase + Send + Sync>,
        registry: MintRegistry,
        session: SessionContext,
        config: &ClaimConfig,
    ) -> Self {
        Self {
            db,
            registry,
            session,
            conflict_retries: config.version_conflict_retries,
        }
    }

    /// Request a locked mint quote for `amount` and persist it `UNPAID`
    #[instrument(skip(self, account, cancel), fields(account_id = %account.id))]
    pub async fn create(
        &self,
        account: &CashuAccount,
        amount: Amount,
        description: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        if amount == Amount::ZERO {
            return Err(Error::AmountTooSmall);
        }

        let path = self.session.new_locking_path()?;
        let locking_pubkey = self.session.derive_locking_key(&path)?.public_key();

        let connector = self.registry.connector(&account.mint_url)?;
        let response = cancellable(
            cancel,
            connector.post_mint_quote(MintQuoteBolt11Request {
                amount,
                unit: account.unit.clone(),
                description: description.clone(),
                pubkey: Some(locking_pubkey),
            }),
        )
        .await?;

        if response.pubkey != Some(locking_pubkey) {
            return Err(CashuError::InvalidMintResponse(
                "mint quote is not locked to the requested key".to_string(),
            )
            .into());
        }

        cancellable(
            cancel,
            self.create_from_mint_quote(
                account,
                &response,
                path,
                ReceiveQuoteKind::Lightning,
                description,
            ),
        )
        .await
    }

    /// Persist a mint quote that was already requested at the mint
    ///
    /// Used for the bridging leg of a cross mint claim, where the resolver
    /// owns the mint quote request.
    pub async fn create_from_mint_quote(
        &self,
        account: &CashuAccount,
        response: &MintQuoteBolt11Response,
        locking_derivation_path: DerivationPath,
        kind: ReceiveQuoteKind,
        description: Option<String>,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        let amount = response.amount.ok_or_else(|| {
            CashuError::InvalidMintResponse("mint quote has no amount".to_string())
        })?;
        if let Some(unit) = &response.unit {
            if unit != &account.unit {
                return Err(Error::UnsupportedUnit);
            }
        }

        let quote = self
            .db
            .create_receive_quote(CreateReceiveQuote {
                quote_id: response.quote.clone(),
                account_id: account.id.clone(),
                user_id: account.user_id.clone(),
                mint_url: account.mint_url.clone(),
                amount,
                currency: account.currency,
                unit: account.unit.clone(),
                payment_request: response.request.clone(),
                locking_derivation_path,
                expires_at: response.expiry.unwrap_or(u64::MAX),
                description,
                kind,
            })
            .await?;

        tracing::info!(
            "Created receive quote {} for {} {} at {}",
            quote.id,
            quote.amount,
            quote.unit,
            quote.mint_url
        );

        Ok(quote)
    }

    /// `UNPAID -> EXPIRED`
    ///
    /// A no-op once terminal. Fails for a paid quote and for a quote that has
    /// not reached its expiry.
    #[instrument(skip(self, quote), fields(quote_id = %quote.id))]
    pub async fn mark_expired(
        &self,
        quote: &Versioned<ReceiveQuote>,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        match quote.status() {
            status if status.is_terminal() => return Ok(quote.clone()),
            ReceiveQuoteStatus::Paid => {
                return Err(Error::InvalidQuoteState {
                    id: quote.id.clone(),
                    status: ReceiveQuoteStatus::Paid,
                })
            }
            _ => {}
        }

        if !quote.is_expired_at(unix_time()) {
            return Err(Error::QuoteNotExpired(quote.id.clone()));
        }

        let quote = self.db.expire_receive_quote(&quote.id, quote.version).await?;
        tracing::info!("Receive quote {} expired", quote.id);
        Ok(quote)
    }

    /// Non terminal `-> FAILED`, a no-op once terminal
    #[instrument(skip(self, quote), fields(quote_id = %quote.id))]
    pub async fn mark_failed(
        &self,
        quote: &Versioned<ReceiveQuote>,
        reason: String,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        if quote.status().is_terminal() {
            return Ok(quote.clone());
        }

        let quote = self
            .db
            .fail_receive_quote(&quote.id, quote.version, reason)
            .await?;
        tracing::warn!("Receive quote {} failed: {:?}", quote.id, quote.state);
        Ok(quote)
    }

    /// Mint the proofs of a paid quote onto its account
    ///
    /// A no-op for a completed quote. Version conflicts are returned to the
    /// caller, which refetches before retrying. Mint errors that leave the
    /// signing state unknown keep the quote `PAID` for a later retry.
    #[instrument(skip_all, fields(quote_id = %quote.id, account_id = %account.id))]
    pub async fn complete(
        &self,
        account: &Versioned<CashuAccount>,
        quote: &Versioned<ReceiveQuote>,
        cancel: &CancellationToken,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error> {
        if quote.account_id != account.id {
            return Err(Error::AccountMismatch(account.id.clone()));
        }

        let (quote, account) = match quote.status() {
            ReceiveQuoteStatus::Completed => return Ok((quote.clone(), account.clone())),
            ReceiveQuoteStatus::Expired => return Err(Error::QuoteExpired(quote.id.clone())),
            ReceiveQuoteStatus::Failed => {
                return Err(Error::InvalidQuoteState {
                    id: quote.id.clone(),
                    status: ReceiveQuoteStatus::Failed,
                })
            }
            ReceiveQuoteStatus::Unpaid => self.reserve_outputs(account, quote, cancel).await?,
            ReceiveQuoteStatus::Paid => (quote.clone(), account.clone()),
        };

        let proofs = self.mint_proofs(&quote).await?;
        self.store_proofs(quote, account, proofs).await
    }

    /// Check the mint was paid, then `UNPAID -> PAID` with reserved counters
    async fn reserve_outputs(
        &self,
        account: &Versioned<CashuAccount>,
        quote: &Versioned<ReceiveQuote>,
        cancel: &CancellationToken,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error> {
        let connector = self.registry.connector(&quote.mint_url)?;
        let status = cancellable(cancel, connector.get_mint_quote_status(&quote.quote_id)).await?;
        if status.state == QuoteState::Unpaid {
            return Err(Error::QuoteNotPaid(quote.id.clone()));
        }

        let keyset = cancellable(
            cancel,
            self.registry.active_keyset(&quote.mint_url, &quote.unit),
        )
        .await?;
        let outputs = reservation(keyset.id, account.counter(&keyset.id), quote.amount);

        tracing::debug!(
            "Reserving counters {}..{} of keyset {} for quote {}",
            outputs.keyset_counter,
            outputs.next_counter(),
            outputs.keyset_id,
            quote.id
        );

        cancellable(
            cancel,
            self.db
                .process_receive_quote_payment(ProcessReceiveQuotePayment {
                    quote_id: quote.id.clone(),
                    quote_version: quote.version,
                    outputs,
                    account_version: account.version,
                }),
        )
        .await
    }

    /// Mint the reserved outputs of a `PAID` quote, restoring when the mint
    /// already signed them
    async fn mint_proofs(&self, quote: &Versioned<ReceiveQuote>) -> Result<Proofs, Error> {
        let outputs = quote.outputs().cloned().ok_or_else(|| Error::InvalidQuoteState {
            id: quote.id.clone(),
            status: quote.status(),
        })?;

        let connector = self.registry.connector(&quote.mint_url)?;
        let keys = self
            .registry
            .keys(&quote.mint_url, outputs.keyset_id)
            .await?;
        let pre_mint = self
            .session
            .with_seed(|seed| derive_outputs(seed, &outputs))??;
        let locking_key = self
            .session
            .derive_locking_key(&quote.locking_derivation_path)?;

        let mut request = MintRequest {
            quote: quote.quote_id.clone(),
            outputs: pre_mint.blinded_messages(),
            signature: None,
        };
        request.sign(&locking_key);

        match connector.post_mint(request).await {
            Ok(response) => construct(&pre_mint, response.signatures, &keys),
            Err(err) if is_already_issued(&err) => {
                tracing::info!(
                    "Mint reports quote {} already issued, restoring outputs",
                    quote.id
                );
                recover_reservation(connector.as_ref(), &pre_mint, &outputs, &keys).await
            }
            Err(CashuError::UnpaidQuote | CashuError::PendingQuote) => {
                Err(Error::QuoteNotPaid(quote.id.clone()))
            }
            Err(err) if err.is_definitive_failure() => {
                tracing::warn!("Mint rejected quote {}: {}", quote.id, err);
                self.db
                    .fail_receive_quote(&quote.id, quote.version, err.to_string())
                    .await?;
                Err(err.into())
            }
            Err(err) => {
                tracing::warn!(
                    "Mint call for quote {} failed without a definitive answer: {}",
                    quote.id,
                    err
                );
                match recover_reservation(connector.as_ref(), &pre_mint, &outputs, &keys).await {
                    Ok(proofs) => Ok(proofs),
                    Err(restore_err) => {
                        tracing::debug!("Restore probe of quote {}: {}", quote.id, restore_err);
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// `PAID -> COMPLETED`, refetching the account when only it went stale
    async fn store_proofs(
        &self,
        mut quote: Versioned<ReceiveQuote>,
        mut account: Versioned<CashuAccount>,
        proofs: Proofs,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error> {
        let mut attempts = 0;
        loop {
            let res = self
                .db
                .complete_receive_quote(&quote.id, quote.version, proofs.clone(), account.version)
                .await;

            let err = match res {
                Ok((quote, account)) => {
                    tracing::info!(
                        "Receive quote {} completed, {} {} added to account {}",
                        quote.id,
                        quote.amount,
                        quote.unit,
                        account.id
                    );
                    return Ok((quote, account));
                }
                Err(err) if err.is_version_conflict() && attempts < self.conflict_retries => err,
                Err(err) => return Err(err.into()),
            };
            attempts += 1;

            let current = self
                .db
                .get_receive_quote(&quote.id)
                .await?
                .ok_or(Error::Database(err))?;
            if current.version != quote.version {
                // Another actor stored the same outputs
                let account = fetch_account(self.db.as_ref(), &account.id).await?;
                if current.status() == ReceiveQuoteStatus::Completed {
                    return Ok((current, account));
                }
                return Err(Error::InvalidQuoteState {
                    id: current.id.clone(),
                    status: current.status(),
                });
            }

            quote = current;
            account = fetch_account(self.db.as_ref(), &account.id).await?;
        }
    }
}
