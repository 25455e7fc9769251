//! Orchestrator run loop fed by the quote tracker and store changes

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::bip32::DerivationPath;
use cdk_claim::common::util::unix_time;
use cdk_claim::common::wallet::{
    CashuAccount, Currency, ReceiveQuote, ReceiveQuoteKind, ReceiveQuoteStatus, Versioned,
};
use cdk_claim::common::{
    Amount, ClaimDatabase, CurrencyUnit, MintConnector, MintQuoteBolt11Request,
    MintQuoteBolt11Response,
};
use cdk_claim::{
    ClaimConfig, MintRegistry, QuoteOrchestrator, SessionContext, TrackedQuote, TrackingMode,
};
use cdk_claim_fake_mint::{Endpoint, FakeMint, Fault};
use cdk_claim_memory::MemoryClaimDatabase;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    mint: FakeMint,
    db: MemoryClaimDatabase,
    orchestrator: QuoteOrchestrator,
    account: Versioned<CashuAccount>,
    cancel: CancellationToken,
    runner: JoinHandle<Result<(), cdk_claim::Error>>,
}

impl Harness {
    async fn start(mint: FakeMint) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let registry = MintRegistry::new();
        registry.add(Arc::new(mint.clone()));

        let session = SessionContext::new("user-1", [3; 64])?;
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

        let (orchestrator, events) = QuoteOrchestrator::new(
            Arc::new(db.clone()),
            registry,
            session,
            ClaimConfig::default(),
        );
        let cancel = CancellationToken::new();
        let runner = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.run(events, cancel).await })
        };

        Ok(Self {
            mint,
            db,
            orchestrator,
            account,
            cancel,
            runner,
        })
    }

    async fn wait_for(
        &self,
        id: &str,
        status: ReceiveQuoteStatus,
    ) -> anyhow::Result<Versioned<ReceiveQuote>> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(quote) = self.db.get_receive_quote(id).await? {
                    if quote.status() == status {
                        return Ok::<_, anyhow::Error>(quote);
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await?
    }

    async fn wait_for_mode(&self, quote: &ReceiveQuote) -> anyhow::Result<TrackingMode> {
        let tracker = self.orchestrator.tracker();
        Ok(tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(mode) = tracker.mode(&quote.mint_url, &quote.unit) {
                    return mode;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?)
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.runner.await??;
        self.orchestrator.shutdown();
        Ok(())
    }
}

#[tokio::test]
async fn test_polling_mint_quote_is_completed() -> anyhow::Result<()> {
    let mint = FakeMint::builder("https://mint.example.com")?
        .websocket(false)
        .build();
    let harness = Harness::start(mint).await?;

    let quote = harness
        .orchestrator
        .create_receive_quote(&harness.account.id, Amount::from(10), None, &harness.cancel)
        .await?;
    assert_eq!(harness.wait_for_mode(&quote).await?, TrackingMode::Polling);

    harness.mint.pay_quote(&quote.quote_id)?;
    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Completed)
        .await?;
    assert_eq!(harness.mint.calls(Endpoint::Subscribe), 0);
    assert!(harness.mint.calls(Endpoint::MintQuoteStatus) >= 2);

    harness.stop().await
}

#[tokio::test]
async fn test_paid_quote_retried_after_transient_mint_error() -> anyhow::Result<()> {
    let mint = FakeMint::builder("https://mint.example.com")?
        .websocket(false)
        .build();
    let harness = Harness::start(mint).await?;

    let quote = harness
        .orchestrator
        .create_receive_quote(&harness.account.id, Amount::from(10), None, &harness.cancel)
        .await?;
    // First mint call never reaches the mint, nothing else re-reports PAID
    harness.mint.inject_fault(Endpoint::Mint, Fault::Unreachable);
    harness.mint.pay_quote(&quote.quote_id)?;

    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Completed)
        .await?;
    assert_eq!(harness.mint.calls(Endpoint::Mint), 2);
    assert_eq!(
        harness
            .db
            .get_account(&harness.account.id)
            .await?
            .map(|account| account.proofs.len()),
        Some(2)
    );
    assert!(harness.orchestrator.tracker().tracked().is_empty());

    harness.stop().await
}

#[tokio::test]
async fn test_subscription_mode_per_mint() -> anyhow::Result<()> {
    let harness = Harness::start(FakeMint::new("https://mint.example.com")?).await?;

    let quote = harness
        .orchestrator
        .create_receive_quote(&harness.account.id, Amount::from(10), None, &harness.cancel)
        .await?;
    assert_eq!(
        harness.wait_for_mode(&quote).await?,
        TrackingMode::Subscription
    );

    harness.mint.pay_quote(&quote.quote_id)?;
    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Completed)
        .await?;
    assert_eq!(harness.mint.calls(Endpoint::MintQuoteStatus), 1);

    harness.stop().await
}

#[tokio::test]
async fn test_store_reconnect_resyncs_tracking() -> anyhow::Result<()> {
    let harness = Harness::start(FakeMint::new("https://mint.example.com")?).await?;

    let quote = harness
        .orchestrator
        .create_receive_quote(&harness.account.id, Amount::from(10), None, &harness.cancel)
        .await?;
    tokio::time::timeout(Duration::from_secs(10), async {
        while harness.mint.active_subscriptions() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    // Payment lands while both channels are down
    harness.mint.disconnect_subscriptions();
    harness.db.emit_reconnect();
    harness.mint.pay_quote(&quote.quote_id)?;

    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Completed)
        .await?;
    assert!(harness.mint.calls(Endpoint::Subscribe) >= 2);
    assert!(harness.mint.calls(Endpoint::Info) >= 2);

    harness.stop().await
}

#[tokio::test]
async fn test_deadline_expires_unpaid_quote() -> anyhow::Result<()> {
    let harness = Harness::start(FakeMint::new("https://mint.example.com")?).await?;

    let response = harness
        .mint
        .post_mint_quote(MintQuoteBolt11Request {
            amount: Amount::from(10),
            unit: CurrencyUnit::Sat,
            description: None,
            pubkey: None,
        })
        .await?;
    let response = MintQuoteBolt11Response {
        expiry: Some(unix_time() - 1),
        ..response
    };
    let quote = harness
        .orchestrator
        .receive()
        .create_from_mint_quote(
            &harness.account,
            &response,
            DerivationPath::from_str("m/129372'/0'/2'/7'")?,
            ReceiveQuoteKind::Lightning,
            None,
        )
        .await?;
    harness
        .orchestrator
        .tracker()
        .track(TrackedQuote::from(&quote.value));

    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Expired)
        .await?;
    assert!(harness.orchestrator.tracker().tracked().is_empty());

    harness.stop().await
}

#[tokio::test]
async fn test_late_payment_beats_deadline() -> anyhow::Result<()> {
    let harness = Harness::start(
        FakeMint::builder("https://mint.example.com")?
            .websocket(false)
            .build(),
    )
    .await?;

    let response = harness
        .mint
        .post_mint_quote(MintQuoteBolt11Request {
            amount: Amount::from(10),
            unit: CurrencyUnit::Sat,
            description: None,
            pubkey: None,
        })
        .await?;
    harness.mint.pay_quote(&response.quote)?;

    let response = MintQuoteBolt11Response {
        expiry: Some(unix_time() - 1),
        ..response
    };
    let quote = harness
        .orchestrator
        .receive()
        .create_from_mint_quote(
            &harness.account,
            &response,
            DerivationPath::from_str("m/129372'/0'/2'/8'")?,
            ReceiveQuoteKind::Lightning,
            None,
        )
        .await?;
    harness
        .orchestrator
        .tracker()
        .track(TrackedQuote::from(&quote.value));

    // Deadline check sees PAID and completes instead of expiring
    harness
        .wait_for(&quote.id, ReceiveQuoteStatus::Completed)
        .await?;

    harness.stop().await
}
