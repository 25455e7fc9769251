//! Mint quote tracker
//!
//! Keeps the orchestrator informed of mint side state changes of pending
//! receive quotes. Every (mint, unit) gets one worker task that either holds
//! a NUT-17 subscription or polls, decided once from the mint's advertised
//! capability when the worker starts, so the two modes never run side by side
//! for a mint. Every quote additionally gets a one shot deadline timer at its
//! expiry that checks the quote instead of assuming it expired. Events whose
//! dispatch failed with a retryable error are handed back through
//! [`MintQuoteTracker::retry`] and delivered again after a back-off.
//!
//! ```text
//! track(quote) ──> worker (mint, unit) ──┬─ subscription ─┐
//!             │                          └─ polling ──────┼──> mpsc<TrackerEvent>
//!             └──> deadline timer (expires_at) ───────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cdk_claim_common::util::unix_time;
use cdk_claim_common::wallet::ReceiveQuote;
use cdk_claim_common::{
    CurrencyUnit, Error as CashuError, MintConnector, MintQuoteBolt11Response,
    MintQuoteSubscription, MintUrl, QuoteState,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClaimConfig;
use crate::registry::MintRegistry;

const EVENT_BUFFER: usize = 256;

/// Quote handed to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedQuote {
    /// Local receive quote id
    pub id: String,
    /// Mint assigned quote id
    pub quote_id: String,
    /// Mint
    pub mint_url: MintUrl,
    /// Unit
    pub unit: CurrencyUnit,
    /// Unix timestamp of expiry
    pub expires_at: u64,
}

impl From<&ReceiveQuote> for TrackedQuote {
    fn from(quote: &ReceiveQuote) -> Self {
        Self {
            id: quote.id.clone(),
            quote_id: quote.quote_id.clone(),
            mint_url: quote.mint_url.clone(),
            unit: quote.unit.clone(),
            expires_at: quote.expires_at,
        }
    }
}

/// Tracker output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Mint reported a quote state
    QuoteState {
        /// Local receive quote id
        id: String,
        /// Mint
        mint_url: MintUrl,
        /// State at the mint
        state: QuoteState,
    },
    /// Quote deadline passed, state checked at the mint
    Deadline {
        /// Local receive quote id
        id: String,
        /// Mint
        mint_url: MintUrl,
        /// State at the mint
        state: QuoteState,
    },
    /// Tracking of a mint keeps failing
    Degraded {
        /// Mint
        mint_url: MintUrl,
        /// Consecutive failures
        failures: u32,
        /// Last error
        error: String,
    },
    /// Tracking of a degraded mint works again
    Recovered {
        /// Mint
        mint_url: MintUrl,
    },
}

/// How a worker learns about quote updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// NUT-17 websocket subscription
    Subscription,
    /// Periodic status checks
    Polling,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription => write!(f, "subscription"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

type WorkerKey = (MintUrl, CurrencyUnit);
type PendingQuotes = BTreeMap<String, TrackedQuote>;

#[derive(Debug)]
struct Worker {
    quotes: watch::Sender<PendingQuotes>,
    mode: Arc<RwLock<Option<TrackingMode>>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    quotes: HashMap<String, TrackedQuote>,
    workers: HashMap<WorkerKey, Worker>,
    deadlines: HashMap<String, JoinHandle<()>>,
    retries: HashMap<String, Retry>,
}

/// Pending redelivery of a quote event
#[derive(Debug)]
struct Retry {
    attempts: u32,
    handle: JoinHandle<()>,
}

/// Mint quote tracker
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct MintQuoteTracker {
    registry: MintRegistry,
    config: ClaimConfig,
    events: mpsc::Sender<TrackerEvent>,
    state: Arc<Mutex<TrackerState>>,
    cancel: CancellationToken,
}

impl MintQuoteTracker {
    /// Create new [`MintQuoteTracker`] and the receiver of its events
    pub fn new(registry: MintRegistry, config: ClaimConfig) -> (Self, mpsc::Receiver<TrackerEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                registry,
                config,
                events,
                state: Arc::new(Mutex::new(TrackerState::default())),
                cancel: CancellationToken::new(),
            },
            receiver,
        )
    }

    /// Start tracking a quote, refreshing it when already tracked
    pub fn track(&self, quote: TrackedQuote) {
        let mut state = self.state.lock();
        let key = (quote.mint_url.clone(), quote.unit.clone());

        if state.quotes.get(&quote.id) == Some(&quote) {
            return;
        }

        let deadline = self.arm_deadline(&quote);
        if let Some(previous) = state.deadlines.insert(quote.id.clone(), deadline) {
            previous.abort();
        }

        if !state.workers.contains_key(&key) {
            let worker = self.spawn_worker(key.clone(), PendingQuotes::new());
            state.workers.insert(key.clone(), worker);
        }
        if let Some(worker) = state.workers.get(&key) {
            worker.quotes.send_modify(|quotes| {
                quotes.insert(quote.quote_id.clone(), quote.clone());
            });
        }

        tracing::debug!("Tracking quote {} at {}", quote.id, quote.mint_url);
        state.quotes.insert(quote.id.clone(), quote);
    }

    /// Stop tracking a quote
    pub fn untrack(&self, id: &str) {
        let mut state = self.state.lock();
        let Some(quote) = state.quotes.remove(id) else {
            return;
        };
        if let Some(deadline) = state.deadlines.remove(id) {
            deadline.abort();
        }
        if let Some(retry) = state.retries.remove(id) {
            retry.handle.abort();
        }

        let key = (quote.mint_url.clone(), quote.unit.clone());
        let empty = match state.workers.get(&key) {
            Some(worker) => {
                worker.quotes.send_modify(|quotes| {
                    quotes.remove(&quote.quote_id);
                });
                worker.quotes.borrow().is_empty()
            }
            None => false,
        };
        if empty {
            if let Some(worker) = state.workers.remove(&key) {
                worker.stop();
            }
        }

        tracing::debug!("Stopped tracking quote {}", id);
    }

    /// Track exactly `quotes`
    pub fn replace(&self, quotes: Vec<TrackedQuote>) {
        let keep: BTreeSet<String> = quotes.iter().map(|q| q.id.clone()).collect();
        let stale: Vec<String> = self
            .state
            .lock()
            .quotes
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();

        for id in stale {
            self.untrack(&id);
        }
        for quote in quotes {
            self.track(quote);
        }
    }

    /// Restart every worker
    ///
    /// Mint metadata is refetched, subscriptions are reopened and polled
    /// quotes are checked right away.
    pub fn resync(&self) {
        let mut state = self.state.lock();
        let keys: Vec<WorkerKey> = state.workers.keys().cloned().collect();
        for key in keys {
            let Some(worker) = state.workers.remove(&key) else {
                continue;
            };
            let quotes = worker.quotes.borrow().clone();
            worker.stop();

            self.registry.refresh(&key.0);
            let worker = self.spawn_worker(key.clone(), quotes);
            state.workers.insert(key, worker);
        }
        tracing::debug!("Tracker resynced {} workers", state.workers.len());
    }

    /// Tracking mode of a mint, `None` before the worker decided
    pub fn mode(&self, mint_url: &MintUrl, unit: &CurrencyUnit) -> Option<TrackingMode> {
        self.state
            .lock()
            .workers
            .get(&(mint_url.clone(), unit.clone()))
            .and_then(|worker| *worker.mode.read())
    }

    /// Ids of tracked quotes
    pub fn tracked(&self) -> Vec<String> {
        self.state.lock().quotes.keys().cloned().collect()
    }

    /// Stop all workers and timers
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        for (_, worker) in state.workers.drain() {
            worker.stop();
        }
        for (_, deadline) in state.deadlines.drain() {
            deadline.abort();
        }
        for (_, retry) in state.retries.drain() {
            retry.handle.abort();
        }
        state.quotes.clear();
    }

    /// Deliver a quote event again after a back-off
    ///
    /// For events whose dispatch failed with a retryable error. The delay
    /// doubles with every retry of the same quote up to the subscription
    /// back-off ceiling. Dropped when the quote is no longer tracked by the
    /// time the delay ran out.
    pub fn retry(&self, event: TrackerEvent) {
        let id = match &event {
            TrackerEvent::QuoteState { id, .. } | TrackerEvent::Deadline { id, .. } => id.clone(),
            TrackerEvent::Degraded { .. } | TrackerEvent::Recovered { .. } => return,
        };

        let mut state = self.state.lock();
        if !state.quotes.contains_key(&id) {
            return;
        }
        let attempts = state.retries.get(&id).map_or(0, |r| r.attempts) + 1;
        let delay = self.config.subscription_backoff(attempts);
        tracing::debug!(
            "Retrying event of quote {} in {}s, attempt {}",
            id,
            delay.as_secs(),
            attempts
        );

        let events = self.events.clone();
        let tracked = self.state.clone();
        let cancel = self.cancel.child_token();
        let quote_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !tracked.lock().quotes.contains_key(&quote_id) {
                return;
            }
            let _ = events.send(event).await;
        });

        if let Some(previous) = state.retries.insert(id, Retry { attempts, handle }) {
            previous.handle.abort();
        }
    }

    fn spawn_worker(&self, key: WorkerKey, quotes: PendingQuotes) -> Worker {
        let (sender, receiver) = watch::channel(quotes);
        let mode = Arc::new(RwLock::new(None));
        let cancel = self.cancel.child_token();

        let ctx = WorkerContext {
            registry: self.registry.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            mint_url: key.0,
            unit: key.1,
            quotes: receiver,
            mode: mode.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(ctx.run());

        Worker {
            quotes: sender,
            mode,
            cancel,
            handle,
        }
    }

    fn arm_deadline(&self, quote: &TrackedQuote) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let events = self.events.clone();
        let cancel = self.cancel.child_token();
        let retries = self.config.deadline_check_retries.max(1);
        let retry_interval = self.config.poll_interval();
        let quote = quote.clone();

        tokio::spawn(async move {
            if quote.expires_at == u64::MAX {
                return;
            }
            // Fire once the quote is strictly past its expiry
            let delay = quote
                .expires_at
                .saturating_add(1)
                .saturating_sub(unix_time());

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }

            let mut attempts = 0;
            let event = loop {
                let res = match registry.connector(&quote.mint_url) {
                    Ok(connector) => connector.get_mint_quote_status(&quote.quote_id).await,
                    Err(err) => Err(CashuError::Custom(err.to_string())),
                };

                match res {
                    Ok(response) => {
                        break TrackerEvent::Deadline {
                            id: quote.id.clone(),
                            mint_url: quote.mint_url.clone(),
                            state: response.state,
                        }
                    }
                    Err(err) => {
                        attempts += 1;
                        tracing::debug!(
                            "Deadline check {} of quote {} failed: {}",
                            attempts,
                            quote.id,
                            err
                        );
                        if attempts >= retries {
                            break TrackerEvent::Degraded {
                                mint_url: quote.mint_url.clone(),
                                failures: attempts,
                                error: err.to_string(),
                            };
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            };

            tracing::debug!("Deadline of quote {} fired", quote.id);
            let _ = events.send(event).await;
        })
    }
}

/// Consecutive failure bookkeeping of a worker
#[derive(Debug, Default)]
struct Failures {
    count: u32,
    degraded: bool,
}

struct WorkerContext {
    registry: MintRegistry,
    config: ClaimConfig,
    events: mpsc::Sender<TrackerEvent>,
    mint_url: MintUrl,
    unit: CurrencyUnit,
    quotes: watch::Receiver<PendingQuotes>,
    mode: Arc<RwLock<Option<TrackingMode>>>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(mut self) {
        let mode = match self
            .registry
            .supports_quote_updates(&self.mint_url, &self.unit)
            .await
        {
            Ok(true) => TrackingMode::Subscription,
            Ok(false) => TrackingMode::Polling,
            Err(err) => {
                tracing::warn!(
                    "Could not read capabilities of {}, polling: {}",
                    self.mint_url,
                    err
                );
                TrackingMode::Polling
            }
        };
        *self.mode.write() = Some(mode);
        tracing::debug!("Tracking {} {} by {}", self.mint_url, self.unit, mode);

        let connector = match self.registry.connector(&self.mint_url) {
            Ok(connector) => connector,
            Err(err) => {
                tracing::error!("No connector for {}: {}", self.mint_url, err);
                return;
            }
        };

        match mode {
            TrackingMode::Subscription => self.subscribe(connector.as_ref()).await,
            TrackingMode::Polling => self.poll(connector.as_ref()).await,
        }
    }

    async fn emit(&self, event: TrackerEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.events.send(event).await;
    }

    async fn emit_state(
        &self,
        seen: &mut HashMap<String, QuoteState>,
        response: &MintQuoteBolt11Response,
    ) {
        let id = match self.quotes.borrow().get(&response.quote) {
            Some(quote) => quote.id.clone(),
            None => return,
        };
        if seen.insert(response.quote.clone(), response.state) == Some(response.state) {
            return;
        }
        self.emit(TrackerEvent::QuoteState {
            id,
            mint_url: self.mint_url.clone(),
            state: response.state,
        })
        .await;
    }

    async fn record_failure(&self, failures: &mut Failures, error: String) {
        failures.count += 1;
        tracing::debug!(
            "Tracking {} failed {} times: {}",
            self.mint_url,
            failures.count,
            error
        );
        if failures.count >= self.config.degraded_threshold && !failures.degraded {
            failures.degraded = true;
            tracing::warn!("Tracking of {} degraded: {}", self.mint_url, error);
            self.emit(TrackerEvent::Degraded {
                mint_url: self.mint_url.clone(),
                failures: failures.count,
                error,
            })
            .await;
        }
    }

    async fn record_success(&self, failures: &mut Failures) {
        if failures.degraded {
            tracing::info!("Tracking of {} recovered", self.mint_url);
            self.emit(TrackerEvent::Recovered {
                mint_url: self.mint_url.clone(),
            })
            .await;
        }
        *failures = Failures::default();
    }

    /// Sleep unless cancelled, `false` when cancelled
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn subscribe(&mut self, connector: &(dyn MintConnector + Send + Sync)) {
        let mut failures = Failures::default();
        let mut subscription: Option<MintQuoteSubscription> = None;
        let mut subscribed: BTreeSet<String> = BTreeSet::new();
        let mut seen: HashMap<String, QuoteState> = HashMap::new();

        loop {
            let pending: BTreeSet<String> = self.quotes.borrow_and_update().keys().cloned().collect();
            seen.retain(|quote_id, _| pending.contains(quote_id));

            if pending.is_empty() {
                subscription = None;
                subscribed.clear();
            } else if subscription.is_none() || !pending.is_subset(&subscribed) {
                subscription = None;
                match connector
                    .subscribe_mint_quotes(pending.iter().cloned().collect())
                    .await
                {
                    Ok(opened) => {
                        tracing::debug!(
                            "Subscribed to {} quotes at {} ({})",
                            pending.len(),
                            self.mint_url,
                            opened.id()
                        );
                        subscription = Some(opened);
                        subscribed = pending;
                        seen.clear();
                        self.record_success(&mut failures).await;
                    }
                    Err(err) => {
                        self.record_failure(&mut failures, err.to_string()).await;
                        if !self.sleep(self.config.subscription_backoff(failures.count)).await {
                            return;
                        }
                        continue;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                changed = self.quotes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                update = next_update(&mut subscription) => match update {
                    Some(Ok(response)) => self.emit_state(&mut seen, &response).await,
                    Some(Err(err)) => {
                        subscription = None;
                        self.record_failure(&mut failures, err.to_string()).await;
                        if !self.sleep(self.config.subscription_backoff(failures.count)).await {
                            return;
                        }
                    }
                    None => {
                        subscription = None;
                        self.record_failure(&mut failures, "subscription closed".to_string())
                            .await;
                        if !self.sleep(self.config.subscription_backoff(failures.count)).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn poll(&mut self, connector: &(dyn MintConnector + Send + Sync)) {
        let mut failures = Failures::default();
        let mut seen: HashMap<String, QuoteState> = HashMap::new();

        loop {
            let quotes: Vec<TrackedQuote> = self.quotes.borrow_and_update().values().cloned().collect();
            seen.retain(|quote_id, _| quotes.iter().any(|q| &q.quote_id == quote_id));

            let mut rate_limited = false;
            let mut error = None;
            for quote in &quotes {
                if self.cancel.is_cancelled() {
                    return;
                }
                match connector.get_mint_quote_status(&quote.quote_id).await {
                    Ok(response) => self.emit_state(&mut seen, &response).await,
                    Err(CashuError::RateLimited) => {
                        rate_limited = true;
                        break;
                    }
                    Err(err) => error = Some(err.to_string()),
                }
            }

            match error {
                Some(error) => self.record_failure(&mut failures, error).await,
                None if !quotes.is_empty() && !rate_limited => {
                    self.record_success(&mut failures).await
                }
                None => {}
            }

            if rate_limited {
                tracing::debug!("Rate limited by {}, backing off", self.mint_url);
                if !self.sleep(self.config.rate_limited_poll_interval()).await {
                    return;
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                changed = self.quotes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }
}

async fn next_update(
    subscription: &mut Option<MintQuoteSubscription>,
) -> Option<Result<MintQuoteBolt11Response, CashuError>> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use cdk_claim_common::{Amount, MintQuoteBolt11Request};
    use cdk_claim_fake_mint::{Endpoint, FakeMint, Fault};

    use super::*;

    async fn quote(mint: &FakeMint) -> TrackedQuote {
        let response = mint
            .post_mint_quote(MintQuoteBolt11Request {
                amount: Amount::from(10),
                unit: CurrencyUnit::Sat,
                description: None,
                pubkey: None,
            })
            .await
            .unwrap();
        TrackedQuote {
            id: format!("local-{}", response.quote),
            quote_id: response.quote,
            mint_url: mint.mint_url().clone(),
            unit: CurrencyUnit::Sat,
            expires_at: u64::MAX,
        }
    }

    fn tracker(mint: &FakeMint) -> (MintQuoteTracker, mpsc::Receiver<TrackerEvent>) {
        let registry = MintRegistry::new();
        registry.add(Arc::new(mint.clone()));
        MintQuoteTracker::new(registry, ClaimConfig::default())
    }

    async fn next_paid(events: &mut mpsc::Receiver<TrackerEvent>) -> TrackerEvent {
        loop {
            let event = events.recv().await.unwrap();
            if let TrackerEvent::QuoteState {
                state: QuoteState::Paid,
                ..
            } = event
            {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_mode() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        tracker.track(quote.clone());
        // Initial state is pushed on subscribe
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            TrackerEvent::QuoteState {
                id: quote.id.clone(),
                mint_url: quote.mint_url.clone(),
                state: QuoteState::Unpaid
            }
        );
        assert_eq!(
            tracker.mode(&quote.mint_url, &quote.unit),
            Some(TrackingMode::Subscription)
        );

        mint.pay_quote(&quote.quote_id).unwrap();
        let event = next_paid(&mut events).await;
        assert!(matches!(event, TrackerEvent::QuoteState { id, .. } if id == quote.id));
        assert_eq!(mint.calls(Endpoint::MintQuoteStatus), 0);

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_mode() {
        let mint = FakeMint::builder("https://mint.example.com")
            .unwrap()
            .websocket(false)
            .build();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        tracker.track(quote.clone());
        events.recv().await.unwrap();
        assert_eq!(
            tracker.mode(&quote.mint_url, &quote.unit),
            Some(TrackingMode::Polling)
        );

        mint.pay_quote(&quote.quote_id).unwrap();
        next_paid(&mut events).await;
        assert_eq!(mint.calls(Endpoint::Subscribe), 0);

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resubscribe_when_set_shrinks() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let (tracker, mut events) = tracker(&mint);
        let first = quote(&mint).await;
        let second = quote(&mint).await;

        tracker.track(first.clone());
        events.recv().await.unwrap();
        tracker.track(second.clone());
        events.recv().await.unwrap();
        assert_eq!(mint.calls(Endpoint::Subscribe), 2);

        tracker.untrack(&first.id);
        mint.pay_quote(&second.quote_id).unwrap();
        next_paid(&mut events).await;
        assert_eq!(mint.calls(Endpoint::Subscribe), 2);

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_disconnect() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        tracker.track(quote.clone());
        events.recv().await.unwrap();

        mint.disconnect_subscriptions();
        mint.pay_quote(&quote.quote_id).unwrap();

        // Missed while disconnected, delivered by the reopened subscription
        next_paid(&mut events).await;
        assert_eq!(mint.calls(Endpoint::Subscribe), 2);

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off() {
        let mint = FakeMint::builder("https://mint.example.com")
            .unwrap()
            .websocket(false)
            .build();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        mint.inject_fault(Endpoint::MintQuoteStatus, Fault::RateLimit);
        let start = tokio::time::Instant::now();
        tracker.track(quote);

        events.recv().await.unwrap();
        assert!(start.elapsed() >= ClaimConfig::default().rate_limited_poll_interval());

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_then_recovered() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        for _ in 0..ClaimConfig::default().degraded_threshold {
            mint.inject_fault(Endpoint::Subscribe, Fault::Unreachable);
        }
        tracker.track(quote.clone());

        assert!(matches!(
            events.recv().await.unwrap(),
            TrackerEvent::Degraded { failures: 5, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            TrackerEvent::Recovered {
                mint_url: quote.mint_url.clone()
            }
        );

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_redelivers_with_backoff() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let (tracker, mut events) = tracker(&mint);
        let quote = quote(&mint).await;

        tracker.track(quote.clone());
        let event = events.recv().await.unwrap();

        let start = tokio::time::Instant::now();
        tracker.retry(event.clone());
        assert_eq!(events.recv().await.unwrap(), event);
        assert!(start.elapsed() >= Duration::from_secs(1));

        // Second retry of the same quote waits longer
        let start = tokio::time::Instant::now();
        tracker.retry(event.clone());
        assert_eq!(events.recv().await.unwrap(), event);
        assert!(start.elapsed() >= Duration::from_secs(2));

        tracker.retry(event.clone());
        tracker.untrack(&quote.id);
        assert!(
            tokio::time::timeout(Duration::from_secs(300), events.recv())
                .await
                .is_err()
        );

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_checks_state() {
        let mint = FakeMint::builder("https://mint.example.com")
            .unwrap()
            .websocket(false)
            .build();
        let (tracker, mut events) = tracker(&mint);
        let mut quote = quote(&mint).await;
        quote.expires_at = unix_time();

        tracker.track(quote.clone());

        let deadline = loop {
            match events.recv().await.unwrap() {
                event @ TrackerEvent::Deadline { .. } => break event,
                _ => continue,
            }
        };
        assert_eq!(
            deadline,
            TrackerEvent::Deadline {
                id: quote.id,
                mint_url: quote.mint_url,
                state: QuoteState::Unpaid
            }
        );

        tracker.shutdown();
    }
}
