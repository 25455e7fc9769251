//! Quote orchestrator
//!
//! Keeps the pending view of a user (receive quotes `UNPAID`/`PAID`, token
//! swaps `PENDING`) moving. Tracker events and store change notifications
//! are dispatched to the lifecycles:
//!
//! ```text
//! mint PAID,   local UNPAID|PAID   -> complete
//! mint ISSUED, local not COMPLETED -> complete
//! deadline,    mint still UNPAID   -> mark_expired
//! local terminal                   -> untrack
//! ```
//!
//! Every dispatch goes through the lifecycle state guards, so duplicate
//! triggers are no-ops. A version conflict refetches the row and re-evaluates
//! the guard; when another actor moved the row to a terminal state the
//! dispatch is dropped as superseded. A dispatch failing with a retryable
//! error is handed back to the tracker for a delayed retry.

use std::sync::Arc;

use bitcoin::bip32::DerivationPath;
use cdk_claim_common::database::{ChangeEvent, Row};
use cdk_claim_common::wallet::{
    CashuAccount, MeltChange, ReceiveQuote, ReceiveQuoteKind, ReceiveQuoteStatus, TokenSwap,
    Versioned,
};
use cdk_claim_common::{
    Amount, BlindSignature, ClaimDatabase, CurrencyUnit, Error as CashuError,
    MeltQuoteBolt11Response, MeltQuoteState, MeltRequest, MintUrl, PreMintSecrets, ProofsMethods,
    QuoteState, Token, TokenHash,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::claimability::claimable_proofs;
use crate::config::ClaimConfig;
use crate::fees::proofs_fee;
use crate::outputs::{blank_reservation, construct_change, derive_outputs};
use crate::receive::ReceiveQuoteService;
use crate::registry::MintRegistry;
use crate::resolver::{resolve, ConnectorQuoter, ExchangeRate, TargetAmount};
use crate::session::SessionContext;
use crate::swap::{sign_inputs, TokenSwapService};
use crate::tracker::{MintQuoteTracker, TrackedQuote, TrackerEvent};
use crate::util::{cancellable, fetch_account};
use crate::Error;

/// Result of dispatching one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Transition applied
    Applied,
    /// Nothing to do in the current state
    Ignored,
    /// Another actor moved the row first
    Superseded,
}

/// Result of [`QuoteOrchestrator::process_all_pending`]
#[derive(Debug, Default)]
pub struct PendingSummary {
    /// Swaps finalized
    pub swaps_completed: usize,
    /// Paid quotes completed
    pub quotes_completed: usize,
    /// Quotes handed to the tracker
    pub tracked: usize,
    /// Rows left pending, by id
    pub errors: Vec<(String, Error)>,
}

/// Result of [`QuoteOrchestrator::claim_token`]
#[derive(Debug)]
pub enum ClaimOutcome {
    /// Token swapped at its own mint
    Swapped(Versioned<TokenSwap>),
    /// Token melted into a receive quote at the account mint
    Bridged {
        /// Receive quote funded by the melt
        quote: Versioned<ReceiveQuote>,
        /// Melt quote paying it, `None` when the claim was already underway
        melt_quote: Option<MeltQuoteBolt11Response>,
    },
}

/// Quote orchestrator
#[derive(Debug, Clone)]
pub struct QuoteOrchestrator {
    db: Arc<dyn ClaimDatabase + Send + Sync>,
    registry: MintRegistry,
    session: SessionContext,
    config: ClaimConfig,
    receive: ReceiveQuoteService,
    swap: TokenSwapService,
    tracker: MintQuoteTracker,
}

impl QuoteOrchestrator {
    /// Create new [`QuoteOrchestrator`] and the receiver of its tracker events
    ///
    /// Pass the receiver to [`QuoteOrchestrator::run`].
    pub fn new(
        db: Arc<dyn ClaimDatabase + Send + Sync>,
        registry: MintRegistry,
        session: SessionContext,
        config: ClaimConfig,
    ) -> (Self, mpsc::Receiver<TrackerEvent>) {
        let receive =
            ReceiveQuoteService::new(db.clone(), registry.clone(), session.clone(), &config);
        let swap = TokenSwapService::new(db.clone(), registry.clone(), session.clone(), &config);
        let (tracker, events) = MintQuoteTracker::new(registry.clone(), config.clone());

        (
            Self {
                db,
                registry,
                session,
                config,
                receive,
                swap,
                tracker,
            },
            events,
        )
    }

    /// Receive quote lifecycle
    pub fn receive(&self) -> &ReceiveQuoteService {
        &self.receive
    }

    /// Token swap lifecycle
    pub fn swaps(&self) -> &TokenSwapService {
        &self.swap
    }

    /// Quote tracker
    pub fn tracker(&self) -> &MintQuoteTracker {
        &self.tracker
    }

    /// Create a Lightning receive quote and start tracking it
    pub async fn create_receive_quote(
        &self,
        account_id: &str,
        amount: Amount,
        description: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        let account = cancellable(cancel, fetch_account(self.db.as_ref(), account_id)).await?;
        if account.user_id != self.session.user_id()? {
            return Err(Error::AccountMismatch(account.id.clone()));
        }

        let quote = self
            .receive
            .create(&account, amount, description, cancel)
            .await?;
        self.tracker.track(TrackedQuote::from(&quote.value));
        Ok(quote)
    }

    /// Finalize pending swaps, complete paid quotes and track the rest
    #[instrument(skip_all)]
    pub async fn process_all_pending(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PendingSummary, Error> {
        let user_id = self.session.user_id()?;
        let mut summary = PendingSummary::default();

        let swaps = cancellable(cancel, self.db.get_pending_token_swaps(&user_id)).await?;
        for swap in swaps {
            match self.finalize_swap(&swap.token_hash, cancel).await {
                Ok((Dispatch::Applied, _)) => summary.swaps_completed += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("Pending swap {} not finalized: {}", swap.token_hash, err);
                    summary.errors.push((swap.token_hash.to_string(), err));
                }
            }
        }

        let quotes = cancellable(cancel, self.db.get_pending_receive_quotes(&user_id)).await?;
        let mut pending = Vec::with_capacity(quotes.len());
        for quote in quotes {
            if quote.status() == ReceiveQuoteStatus::Paid {
                match self.complete_quote(&quote.id, cancel).await {
                    Ok((Dispatch::Applied, _)) => {
                        summary.quotes_completed += 1;
                        continue;
                    }
                    Ok((_, current)) if current.status().is_terminal() => continue,
                    Ok(_) => {}
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(err) => {
                        tracing::warn!("Paid quote {} not completed: {}", quote.id, err);
                        summary.errors.push((quote.id.clone(), err));
                    }
                }
            }
            pending.push(TrackedQuote::from(&quote.value));
        }

        summary.tracked = pending.len();
        self.tracker.replace(pending);

        tracing::info!(
            "Processed pending claims: {} swaps, {} quotes completed, {} tracked",
            summary.swaps_completed,
            summary.quotes_completed,
            summary.tracked
        );
        Ok(summary)
    }

    /// Apply one tracker event
    #[instrument(skip(self, cancel))]
    pub async fn handle_event(
        &self,
        event: TrackerEvent,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, Error> {
        match event {
            TrackerEvent::QuoteState { id, state, .. } => {
                self.apply_state(&id, state, cancel).await
            }
            TrackerEvent::Deadline { id, state, .. } => match state {
                QuoteState::Unpaid => self.expire_quote(&id, cancel).await,
                state => self.apply_state(&id, state, cancel).await,
            },
            TrackerEvent::Degraded {
                mint_url,
                failures,
                error,
            } => {
                tracing::warn!(
                    "Quote tracking of {} degraded after {} failures: {}",
                    mint_url,
                    failures,
                    error
                );
                Ok(Dispatch::Ignored)
            }
            TrackerEvent::Recovered { mint_url } => {
                tracing::info!("Quote tracking of {} recovered", mint_url);
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Dispatch tracker events and store changes until cancelled
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<TrackerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let user_id = self.session.user_id()?;
        let mut changes = self.db.subscribe_changes();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match self.handle_event(event.clone(), &cancel).await {
                        Ok(dispatch) => {
                            tracing::trace!("Dispatched tracker event: {:?}", dispatch)
                        }
                        Err(Error::Cancelled) => break,
                        Err(err) if err.is_retryable() => {
                            tracing::debug!("Tracker event deferred: {}", err);
                            self.tracker.retry(event);
                        }
                        Err(err) => tracing::warn!("Tracker event failed: {}", err),
                    }
                }
                change = changes.recv() => match change {
                    Ok(ChangeEvent::Created(Row::ReceiveQuote(quote)))
                        if quote.user_id == user_id && !quote.status().is_terminal() =>
                    {
                        self.tracker.track(TrackedQuote::from(&quote.value));
                    }
                    Ok(ChangeEvent::Updated(Row::ReceiveQuote(quote)))
                        if quote.status().is_terminal() =>
                    {
                        self.tracker.untrack(&quote.id);
                    }
                    Ok(ChangeEvent::Reconnected) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        tracing::info!("Store changes may have been missed, resyncing");
                        if let Err(err) = self.resync(&cancel).await {
                            tracing::warn!("Resync failed: {}", err);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Store change channel closed");
                        break;
                    }
                }
            }
        }

        tracing::debug!("Orchestrator stopped");
        Ok(())
    }

    /// Refetch the pending set and restart tracking
    pub async fn resync(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let user_id = self.session.user_id()?;
        let quotes = cancellable(cancel, self.db.get_pending_receive_quotes(&user_id)).await?;
        self.tracker
            .replace(quotes.iter().map(|q| TrackedQuote::from(&q.value)).collect());
        self.tracker.resync();
        Ok(())
    }

    /// Claim a token into `account`
    ///
    /// A token of the account mint and unit is swapped. Any other token is
    /// melted at its mint to pay a receive quote of the account, with `rate`
    /// converting token units to account units. Token and account of the
    /// same unit need no rate.
    #[instrument(skip_all, fields(account_id = %account.id))]
    pub async fn claim_token(
        &self,
        token: &Token,
        account: &Versioned<CashuAccount>,
        rate: Option<ExchangeRate>,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome, Error> {
        let user_id = self.session.user_id()?;
        if account.user_id != user_id {
            return Err(Error::AccountMismatch(account.id.clone()));
        }

        let source_mint = token.mint_url()?;
        if source_mint == account.mint_url && token.unit() == account.unit {
            let swap = self.swap.prepare(&user_id, token, account, cancel).await?;
            let (_, swap) = self.finalize_swap(&swap.token_hash, cancel).await?;
            return Ok(ClaimOutcome::Swapped(swap));
        }

        self.bridge_token(&user_id, token, source_mint, account, rate, cancel)
            .await
    }

    async fn bridge_token(
        &self,
        user_id: &str,
        token: &Token,
        source_mint: MintUrl,
        account: &Versioned<CashuAccount>,
        rate: Option<ExchangeRate>,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome, Error> {
        let token_hash = token.token_hash()?;
        // A failed or expired bridge left the token unspent, anything else owns it
        let existing =
            cancellable(cancel, self.db.get_receive_quotes_by_token_hash(&token_hash)).await?;
        if let Some(quote) = existing.into_iter().find(|quote| {
            quote.user_id == user_id
                && !matches!(
                    quote.status(),
                    ReceiveQuoteStatus::Failed | ReceiveQuoteStatus::Expired
                )
        }) {
            tracing::debug!(
                "Token {} is already claimed by {} ({})",
                token_hash,
                quote.id,
                quote.status()
            );
            return Ok(ClaimOutcome::Bridged {
                quote,
                melt_quote: None,
            });
        }

        let source_unit = token.unit();
        let rate = match rate {
            Some(rate) => rate,
            None if source_unit == account.unit => ExchangeRate::IDENTITY,
            None => return Err(Error::InvalidExchangeRate),
        };

        let proofs = claimable_proofs(&token.proofs(), &self.session.p2pk_pubkeys()?)
            .map_err(Error::CannotClaim)?;

        let source = match self.registry.connector(&source_mint) {
            Ok(connector) => connector,
            Err(Error::UnknownMint(_)) => {
                tracing::info!("Registering mint {} of inbound token", source_mint);
                self.registry.add_http(source_mint.clone());
                self.registry.connector(&source_mint)?
            }
            Err(err) => return Err(err),
        };
        let destination = self.registry.connector(&account.mint_url)?;

        let keyset_fees = cancellable(cancel, self.registry.keyset_fees(&source_mint)).await?;
        let input_fee = proofs_fee(&proofs, &keyset_fees)?;
        let available = proofs
            .total_amount()?
            .checked_sub(input_fee)
            .filter(|amount| *amount > Amount::ZERO)
            .ok_or(Error::AmountTooSmall)?;

        let path: DerivationPath = self.session.new_locking_path()?;
        let locking_pubkey = self.session.derive_locking_key(&path)?.public_key();
        let quoter = ConnectorQuoter {
            source: source.clone(),
            source_unit: source_unit.clone(),
            destination,
            destination_unit: account.unit.clone(),
            locking_pubkey,
            description: token.memo().clone(),
        };

        let resolved = cancellable(
            cancel,
            resolve(
                &quoter,
                TargetAmount::Source(available),
                rate,
                self.config.resolver_max_attempts,
            ),
        )
        .await?;
        if resolved.mint_quote.pubkey != Some(locking_pubkey) {
            return Err(CashuError::InvalidMintResponse(
                "mint quote is not locked to the requested key".to_string(),
            )
            .into());
        }

        let change = self
            .reserve_change(
                user_id,
                &source_mint,
                &source_unit,
                available,
                &resolved.melt_quote,
                cancel,
            )
            .await?;
        let change_outputs = match &change {
            Some(change) => Some(
                self.session
                    .with_seed(|seed| derive_outputs(seed, &change.outputs))??,
            ),
            None => None,
        };

        let quote = cancellable(
            cancel,
            self.receive.create_from_mint_quote(
                account,
                &resolved.mint_quote,
                path,
                ReceiveQuoteKind::CashuToken {
                    source_mint_url: source_mint.clone(),
                    melt_quote_id: resolved.melt_quote.quote.clone(),
                    token_hash,
                    change: change.clone(),
                },
                token.memo().clone(),
            ),
        )
        .await?;
        self.tracker.track(TrackedQuote::from(&quote.value));

        // Committed from here on, the tracker picks up whatever the melt leaves
        let inputs = sign_inputs(&self.session, &proofs)?;
        let melt = source
            .post_melt(MeltRequest {
                quote: resolved.melt_quote.quote.clone(),
                inputs,
                outputs: change_outputs.as_ref().map(PreMintSecrets::blinded_messages),
            })
            .await;

        match melt {
            Ok(melt_quote) if melt_quote.state == MeltQuoteState::Paid => {
                tracing::info!(
                    "Melted token {} at {} into quote {}",
                    token_hash,
                    source_mint,
                    quote.id
                );
                if let (Some(change), Some(pre_mint), Some(signatures)) =
                    (&change, &change_outputs, melt_quote.change.clone())
                {
                    if let Err(err) = self
                        .store_change(&source_mint, change, pre_mint, signatures)
                        .await
                    {
                        // Outputs stay on the quote for a later restore
                        tracing::warn!("Change of token {} not stored: {}", token_hash, err);
                    }
                }
                let (_, quote) = self.complete_quote(&quote.id, cancel).await?;
                Ok(ClaimOutcome::Bridged {
                    quote,
                    melt_quote: Some(melt_quote),
                })
            }
            Ok(melt_quote) => {
                tracing::debug!(
                    "Melt of token {} is {:?}, waiting for quote {}",
                    token_hash,
                    melt_quote.state,
                    quote.id
                );
                Ok(ClaimOutcome::Bridged {
                    quote,
                    melt_quote: Some(melt_quote),
                })
            }
            Err(err) if err.is_definitive_failure() => {
                tracing::warn!("Source mint rejected melt of token {}: {}", token_hash, err);
                self.receive.mark_failed(&quote, err.to_string()).await?;
                self.tracker.untrack(&quote.id);
                Err(err.into())
            }
            Err(err) => {
                tracing::warn!(
                    "Melt of token {} failed without a definitive answer: {}",
                    token_hash,
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Reserve blank outputs for the change of a bridging melt
    ///
    /// Change is issued by the source mint, so it needs an account of the
    /// user at that mint and unit. `None` without one, or when the melt
    /// cannot overpay.
    async fn reserve_change(
        &self,
        user_id: &str,
        source_mint: &MintUrl,
        source_unit: &CurrencyUnit,
        available: Amount,
        melt_quote: &MeltQuoteBolt11Response,
        cancel: &CancellationToken,
    ) -> Result<Option<MeltChange>, Error> {
        let max_change = match available.checked_sub(melt_quote.amount) {
            Some(change) if change > Amount::ZERO => change,
            _ => return Ok(None),
        };

        let accounts = cancellable(cancel, self.db.get_user_accounts(user_id)).await?;
        let Some(mut account) = accounts
            .into_iter()
            .find(|a| &a.mint_url == source_mint && &a.unit == source_unit)
        else {
            tracing::debug!(
                "No {} account at {}, melt change of up to {} is not requested",
                source_unit,
                source_mint,
                max_change
            );
            return Ok(None);
        };

        let keyset = cancellable(cancel, self.registry.active_keyset(source_mint, source_unit))
            .await?;
        let mut conflicts = 0;
        loop {
            let outputs = blank_reservation(keyset.id, account.counter(&keyset.id), max_change);
            match cancellable(
                cancel,
                self.db
                    .reserve_account_counters(&account.id, account.version, &outputs),
            )
            .await
            {
                Ok(_) => {
                    return Ok(Some(MeltChange {
                        account_id: account.id.clone(),
                        outputs,
                    }))
                }
                Err(err)
                    if err.is_version_conflict()
                        && conflicts < self.config.version_conflict_retries =>
                {
                    conflicts += 1;
                    account = fetch_account(self.db.as_ref(), &account.id).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Credit signed melt change to the account it was reserved on
    async fn store_change(
        &self,
        source_mint: &MintUrl,
        change: &MeltChange,
        pre_mint: &PreMintSecrets,
        signatures: Vec<BlindSignature>,
    ) -> Result<(), Error> {
        if signatures.is_empty() {
            return Ok(());
        }
        let keys = self
            .registry
            .keys(source_mint, change.outputs.keyset_id)
            .await?;
        let proofs = construct_change(pre_mint, signatures, &keys)?;
        let amount = proofs.total_amount()?;

        let mut conflicts = 0;
        loop {
            let account = fetch_account(self.db.as_ref(), &change.account_id).await?;
            match self
                .db
                .add_account_proofs(&account.id, account.version, proofs.clone())
                .await
            {
                Ok(account) => {
                    tracing::info!("Melt change of {} added to account {}", amount, account.id);
                    return Ok(());
                }
                Err(err)
                    if err.is_version_conflict()
                        && conflicts < self.config.version_conflict_retries =>
                {
                    conflicts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Stop tracking
    pub fn shutdown(&self) {
        self.tracker.shutdown();
    }

    async fn apply_state(
        &self,
        id: &str,
        state: QuoteState,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, Error> {
        let Some(quote) = cancellable(cancel, self.db.get_receive_quote(id)).await? else {
            self.tracker.untrack(id);
            return Ok(Dispatch::Ignored);
        };
        if quote.status().is_terminal() {
            self.tracker.untrack(id);
            return Ok(Dispatch::Ignored);
        }

        match state {
            QuoteState::Unpaid => Ok(Dispatch::Ignored),
            QuoteState::Paid | QuoteState::Issued => {
                self.complete_quote(id, cancel).await.map(|(d, _)| d)
            }
        }
    }

    /// Complete a quote, reconciling version conflicts
    async fn complete_quote(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(Dispatch, Versioned<ReceiveQuote>), Error> {
        let mut conflicts = 0;
        loop {
            let quote = self.fetch_quote(id, cancel).await?;
            if quote.status().is_terminal() {
                self.tracker.untrack(id);
                let dispatch = if conflicts > 0 {
                    Dispatch::Superseded
                } else {
                    Dispatch::Ignored
                };
                return Ok((dispatch, quote));
            }

            let account = cancellable(cancel, fetch_account(self.db.as_ref(), &quote.account_id))
                .await?;
            match self.receive.complete(&account, &quote, cancel).await {
                Ok((quote, _)) => {
                    self.tracker.untrack(id);
                    return Ok((Dispatch::Applied, quote));
                }
                Err(err)
                    if err.is_version_conflict()
                        && conflicts < self.config.version_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::debug!("Version conflict completing quote {}, refetching", id);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn expire_quote(&self, id: &str, cancel: &CancellationToken) -> Result<Dispatch, Error> {
        let mut conflicts = 0;
        loop {
            let Some(quote) = cancellable(cancel, self.db.get_receive_quote(id)).await? else {
                self.tracker.untrack(id);
                return Ok(Dispatch::Ignored);
            };
            match quote.status() {
                status if status.is_terminal() => {
                    self.tracker.untrack(id);
                    return Ok(if conflicts > 0 {
                        Dispatch::Superseded
                    } else {
                        Dispatch::Ignored
                    });
                }
                ReceiveQuoteStatus::Paid => return Ok(Dispatch::Ignored),
                _ => {}
            }

            match self.receive.mark_expired(&quote).await {
                Ok(_) => {
                    self.tracker.untrack(id);
                    return Ok(Dispatch::Applied);
                }
                Err(Error::QuoteNotExpired(_)) => {
                    tracing::debug!("Deadline of quote {} fired before its expiry", id);
                    return Ok(Dispatch::Ignored);
                }
                Err(err)
                    if err.is_version_conflict()
                        && conflicts < self.config.version_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::debug!("Version conflict expiring quote {}, refetching", id);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Finalize a swap, reconciling version conflicts
    async fn finalize_swap(
        &self,
        token_hash: &TokenHash,
        cancel: &CancellationToken,
    ) -> Result<(Dispatch, Versioned<TokenSwap>), Error> {
        let mut conflicts = 0;
        loop {
            let swap = cancellable(cancel, self.db.get_token_swap(token_hash))
                .await?
                .ok_or_else(|| {
                    cdk_claim_common::database::Error::NotFound {
                        entity: cdk_claim_common::database::Entity::TokenSwap,
                        id: token_hash.to_string(),
                    }
                })?;
            if swap.status().is_terminal() && conflicts > 0 {
                return Ok((Dispatch::Superseded, swap));
            }
            let was_terminal = swap.status().is_terminal();

            let account =
                cancellable(cancel, fetch_account(self.db.as_ref(), &swap.account_id)).await?;
            match self.swap.finalize(&account, &swap).await {
                Ok((swap, _)) if was_terminal => return Ok((Dispatch::Ignored, swap)),
                Ok((swap, _)) => return Ok((Dispatch::Applied, swap)),
                Err(err)
                    if err.is_version_conflict()
                        && conflicts < self.config.version_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::debug!("Version conflict finalizing swap {}, refetching", token_hash);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_quote(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        cancellable(cancel, self.db.get_receive_quote(id))
            .await?
            .ok_or_else(|| {
                cdk_claim_common::database::Error::NotFound {
                    entity: cdk_claim_common::database::Entity::ReceiveQuote,
                    id: id.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::str::FromStr;

    use cdk_claim_common::util::unix_time;
    use cdk_claim_common::wallet::{Currency, ProcessReceiveQuotePayment};
    use cdk_claim_common::{CurrencyUnit, MintConnector, MintQuoteBolt11Response};
    use cdk_claim_fake_mint::{Endpoint, FakeMint};
    use cdk_claim_memory::MemoryClaimDatabase;

    use super::*;
    use crate::outputs::reservation;

    const MNEMONIC: &str =
        "half depart obvious quality work element tank gorilla view sugar picture humble";

    struct Fixture {
        mint: FakeMint,
        db: MemoryClaimDatabase,
        orchestrator: QuoteOrchestrator,
        account: Versioned<CashuAccount>,
    }

    async fn fixture() -> Fixture {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let registry = MintRegistry::new();
        registry.add(Arc::new(mint.clone()));

        let mnemonic = bip39::Mnemonic::from_str(MNEMONIC).unwrap();
        let session = SessionContext::from_mnemonic("user-1", &mnemonic, "").unwrap();

        let db = MemoryClaimDatabase::new();
        let account = db
            .add_account(CashuAccount {
                id: "account-1".to_string(),
                user_id: "user-1".to_string(),
                mint_url: mint.mint_url().clone(),
                currency: Currency::Btc,
                unit: CurrencyUnit::Sat,
                proofs: vec![],
                keyset_counters: HashMap::new(),
            })
            .await;

        let (orchestrator, _events) = QuoteOrchestrator::new(
            Arc::new(db.clone()),
            registry,
            session,
            ClaimConfig::default(),
        );

        Fixture {
            mint,
            db,
            orchestrator,
            account,
        }
    }

    fn paid_event(quote: &ReceiveQuote, state: QuoteState) -> TrackerEvent {
        TrackerEvent::QuoteState {
            id: quote.id.clone(),
            mint_url: quote.mint_url.clone(),
            state,
        }
    }

    #[tokio::test]
    async fn test_duplicate_paid_events_complete_once() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let quote = f
            .orchestrator
            .create_receive_quote(&f.account.id, Amount::from(100), None, &cancel)
            .await
            .unwrap();
        assert_eq!(f.orchestrator.tracker().tracked(), vec![quote.id.clone()]);

        f.mint.pay_quote(&quote.quote_id).unwrap();

        let event = paid_event(&quote, QuoteState::Paid);
        let first = f.orchestrator.handle_event(event.clone(), &cancel).await.unwrap();
        let second = f.orchestrator.handle_event(event, &cancel).await.unwrap();
        assert_eq!(first, Dispatch::Applied);
        assert_eq!(second, Dispatch::Ignored);

        // Missed PAID, mint already reports ISSUED
        let third = f
            .orchestrator
            .handle_event(paid_event(&quote, QuoteState::Issued), &cancel)
            .await
            .unwrap();
        assert_eq!(third, Dispatch::Ignored);

        let account = f.db.get_account(&f.account.id).await.unwrap().unwrap();
        assert_eq!(account.balance().unwrap(), Amount::from(100));
        assert_eq!(f.mint.calls(Endpoint::Mint), 1);
        assert!(f.orchestrator.tracker().tracked().is_empty());

        f.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_unpaid_state_is_ignored() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let quote = f
            .orchestrator
            .create_receive_quote(&f.account.id, Amount::from(100), None, &cancel)
            .await
            .unwrap();
        let dispatch = f
            .orchestrator
            .handle_event(paid_event(&quote, QuoteState::Unpaid), &cancel)
            .await
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ignored);

        f.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_deadline_expires_unpaid_quote() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let response = f
            .mint
            .post_mint_quote(cdk_claim_common::MintQuoteBolt11Request {
                amount: Amount::from(10),
                unit: CurrencyUnit::Sat,
                description: None,
                pubkey: None,
            })
            .await
            .unwrap();
        let response = MintQuoteBolt11Response {
            expiry: Some(unix_time() - 60),
            ..response
        };
        let quote = f
            .orchestrator
            .receive()
            .create_from_mint_quote(
                &f.account,
                &response,
                DerivationPath::from_str("m/129372'/0'/2'/1'").unwrap(),
                ReceiveQuoteKind::Lightning,
                None,
            )
            .await
            .unwrap();

        let deadline = TrackerEvent::Deadline {
            id: quote.id.clone(),
            mint_url: quote.mint_url.clone(),
            state: QuoteState::Unpaid,
        };
        let first = f
            .orchestrator
            .handle_event(deadline.clone(), &cancel)
            .await
            .unwrap();
        let second = f.orchestrator.handle_event(deadline, &cancel).await.unwrap();
        assert_eq!(first, Dispatch::Applied);
        assert_eq!(second, Dispatch::Ignored);

        let stored = f.db.get_receive_quote(&quote.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), ReceiveQuoteStatus::Expired);
    }

    #[tokio::test]
    async fn test_deadline_before_expiry_is_ignored() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let quote = f
            .orchestrator
            .create_receive_quote(&f.account.id, Amount::from(10), None, &cancel)
            .await
            .unwrap();
        let dispatch = f
            .orchestrator
            .handle_event(
                TrackerEvent::Deadline {
                    id: quote.id.clone(),
                    mint_url: quote.mint_url.clone(),
                    state: QuoteState::Unpaid,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(dispatch, Dispatch::Ignored);

        f.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_process_all_pending_resumes_paid_quote() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let paid = f
            .orchestrator
            .create_receive_quote(&f.account.id, Amount::from(21), None, &cancel)
            .await
            .unwrap();
        let unpaid = f
            .orchestrator
            .create_receive_quote(&f.account.id, Amount::from(42), None, &cancel)
            .await
            .unwrap();

        // Crash after the reservation write, before minting
        f.mint.pay_quote(&paid.quote_id).unwrap();
        let account = f.db.get_account(&f.account.id).await.unwrap().unwrap();
        f.db.process_receive_quote_payment(ProcessReceiveQuotePayment {
            quote_id: paid.id.clone(),
            quote_version: paid.version,
            outputs: reservation(f.mint.keyset_id(), 0, paid.amount),
            account_version: account.version,
        })
        .await
        .unwrap();

        let summary = f.orchestrator.process_all_pending(&cancel).await.unwrap();
        assert_eq!(summary.quotes_completed, 1);
        assert_eq!(summary.tracked, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(f.orchestrator.tracker().tracked(), vec![unpaid.id.clone()]);

        let account = f.db.get_account(&f.account.id).await.unwrap().unwrap();
        assert_eq!(account.balance().unwrap(), Amount::from(21));

        f.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_claim_same_mint_token() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let proofs = f.mint.issue_proofs(Amount::from(64)).unwrap();
        let token = Token::new(f.mint.mint_url().clone(), proofs, None, CurrencyUnit::Sat);

        let first = f
            .orchestrator
            .claim_token(&token, &f.account, None, &cancel)
            .await
            .unwrap();
        let ClaimOutcome::Swapped(swap) = first else {
            panic!("same mint token must be swapped");
        };
        assert_eq!(swap.amount, Amount::from(64));

        let account = f.db.get_account(&f.account.id).await.unwrap().unwrap();
        let again = f
            .orchestrator
            .claim_token(&token, &account, None, &cancel)
            .await
            .unwrap();
        assert!(matches!(again, ClaimOutcome::Swapped(s) if s.token_hash == swap.token_hash));
        assert_eq!(f.mint.calls(Endpoint::Swap), 1);

        let account = f.db.get_account(&f.account.id).await.unwrap().unwrap();
        assert_eq!(account.balance().unwrap(), Amount::from(64));
    }

    #[tokio::test]
    async fn test_other_unit_needs_rate() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let usd = FakeMint::builder("https://usd.example.com")
            .unwrap()
            .unit(CurrencyUnit::Usd)
            .build();
        let proofs = usd.issue_proofs(Amount::from(500)).unwrap();
        let token = Token::new(usd.mint_url().clone(), proofs, None, CurrencyUnit::Usd);

        let err = f
            .orchestrator
            .claim_token(&token, &f.account, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidExchangeRate));
    }
}
