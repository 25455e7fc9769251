//! Cross mint quote resolution
//!
//! Claiming ecash of one mint (or currency) into another goes over Lightning:
//! the destination mint issues a mint quote, the source mint melts the token
//! to pay its invoice. The melt fee is only known once the melt quote exists,
//! so the amount to mint is found by a bounded fixed point iteration.
//!
//! ```text
//! amount_to_melt = available
//! loop (max attempts):
//!     amount_to_mint = rate(amount_to_melt)          fail if < 1
//!     mint quote (destination) for amount_to_mint
//!     melt quote (source) for its invoice
//!     required = melt.amount + melt.fee_reserve
//!     required <= available  => accept
//!     amount_to_melt -= required - available
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use cdk_claim_common::{
    Amount, CurrencyUnit, MeltQuoteBolt11Request, MeltQuoteBolt11Response, MintConnector,
    MintQuoteBolt11Request, MintQuoteBolt11Response, PublicKey,
};
use tracing::instrument;

use crate::Error;

/// Source of the quote pair the resolver iterates on
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait CrossMintQuoter: Debug {
    /// Mint quote at the destination mint, in destination units
    async fn mint_quote(&self, amount: Amount) -> Result<MintQuoteBolt11Response, Error>;

    /// Melt quote at the source mint paying `request`
    async fn melt_quote(&self, request: &str) -> Result<MeltQuoteBolt11Response, Error>;
}

/// [`CrossMintQuoter`] over two mint connectors
#[derive(Debug, Clone)]
pub struct ConnectorQuoter {
    /// Mint the token is melted at
    pub source: Arc<dyn MintConnector + Send + Sync>,
    /// Unit of the token
    pub source_unit: CurrencyUnit,
    /// Mint the proofs are minted at
    pub destination: Arc<dyn MintConnector + Send + Sync>,
    /// Unit of the destination account
    pub destination_unit: CurrencyUnit,
    /// NUT-20 key the mint quote is locked to
    pub locking_pubkey: PublicKey,
    /// Memo of the mint quote
    pub description: Option<String>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl CrossMintQuoter for ConnectorQuoter {
    async fn mint_quote(&self, amount: Amount) -> Result<MintQuoteBolt11Response, Error> {
        Ok(self
            .destination
            .post_mint_quote(MintQuoteBolt11Request {
                amount,
                unit: self.destination_unit.clone(),
                description: self.description.clone(),
                pubkey: Some(self.locking_pubkey),
            })
            .await?)
    }

    async fn melt_quote(&self, request: &str) -> Result<MeltQuoteBolt11Response, Error> {
        Ok(self
            .source
            .post_melt_quote(MeltQuoteBolt11Request {
                request: request.to_string(),
                unit: self.source_unit.clone(),
            })
            .await?)
    }
}

/// Destination units per source unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeRate(f64);

impl ExchangeRate {
    /// Same currency on both sides
    pub const IDENTITY: Self = Self(1.0);

    /// Create new [`ExchangeRate`]
    pub fn new(rate: f64) -> Result<Self, Error> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::InvalidExchangeRate);
        }
        Ok(Self(rate))
    }

    /// Rate value
    pub fn rate(&self) -> f64 {
        self.0
    }

    /// Source amount in destination units, rounded down
    pub fn to_destination(&self, amount: Amount) -> Amount {
        Amount::from((amount.to_u64() as f64 * self.0).floor() as u64)
    }

    /// Destination amount in source units, rounded up
    pub fn to_source(&self, amount: Amount) -> Amount {
        Amount::from((amount.to_u64() as f64 / self.0).ceil() as u64)
    }
}

impl Default for ExchangeRate {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Amount the caller wants to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAmount {
    /// Spend at most this much at the source mint
    Source(Amount),
    /// Spend the source equivalent of this much destination currency
    Destination(Amount),
}

/// Accepted quote pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossMintQuote {
    /// Mint quote at the destination mint
    pub mint_quote: MintQuoteBolt11Response,
    /// Melt quote at the source mint paying the mint quote
    pub melt_quote: MeltQuoteBolt11Response,
    /// Destination amount the mint quote was created for
    pub amount_to_mint: Amount,
    /// Attempts used
    pub attempts: u32,
}

/// Find a mint and melt quote pair whose melt cost fits the target
#[instrument(skip(quoter))]
pub async fn resolve<Q>(
    quoter: &Q,
    target: TargetAmount,
    rate: ExchangeRate,
    max_attempts: u32,
) -> Result<CrossMintQuote, Error>
where
    Q: CrossMintQuoter + ?Sized,
{
    let available = match target {
        TargetAmount::Source(amount) => amount,
        TargetAmount::Destination(amount) => rate.to_source(amount),
    };

    let mut amount_to_melt = available;

    for attempt in 1..=max_attempts {
        let amount_to_mint = rate.to_destination(amount_to_melt);
        if amount_to_mint < Amount::ONE {
            return Err(Error::AmountTooSmall);
        }

        let mint_quote = quoter.mint_quote(amount_to_mint).await?;
        let melt_quote = quoter.melt_quote(&mint_quote.request).await?;

        let required = melt_quote
            .total_required()
            .ok_or(cdk_claim_common::Error::AmountOverflow)?;

        if required <= available {
            tracing::debug!(
                "Resolved cross mint quote on attempt {}: mint {} for {} of {}",
                attempt,
                amount_to_mint,
                required,
                available
            );
            return Ok(CrossMintQuote {
                mint_quote,
                melt_quote,
                amount_to_mint,
                attempts: attempt,
            });
        }

        let diff = required.saturating_sub(available);
        tracing::debug!(
            "Attempt {}: melt requires {} of {}, lowering by {}",
            attempt,
            required,
            available,
            diff
        );

        amount_to_melt = match amount_to_melt.checked_sub(diff) {
            Some(amount) if amount > Amount::ZERO => amount,
            _ => return Err(Error::AmountTooSmall),
        };
    }

    Err(Error::NoValidQuotes)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cdk_claim_common::{MeltQuoteState, QuoteState};
    use proptest::prelude::*;

    use super::*;

    /// Same unit on both sides, melt fee read from a schedule
    #[derive(Debug)]
    struct ScheduledQuoter {
        fees: Vec<u64>,
        calls: Mutex<usize>,
    }

    impl ScheduledQuoter {
        fn new(fees: Vec<u64>) -> Self {
            Self {
                fees,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CrossMintQuoter for ScheduledQuoter {
        async fn mint_quote(&self, amount: Amount) -> Result<MintQuoteBolt11Response, Error> {
            Ok(MintQuoteBolt11Response {
                quote: format!("mint-{amount}"),
                request: amount.to_string(),
                amount: Some(amount),
                unit: Some(CurrencyUnit::Sat),
                state: QuoteState::Unpaid,
                expiry: Some(0),
                pubkey: None,
            })
        }

        async fn melt_quote(&self, request: &str) -> Result<MeltQuoteBolt11Response, Error> {
            let mut calls = self.calls.lock().unwrap();
            let fee = self.fees[*calls % self.fees.len()];
            *calls += 1;

            Ok(MeltQuoteBolt11Response {
                quote: format!("melt-{calls}"),
                amount: request.parse::<Amount>().unwrap(),
                fee_reserve: Amount::from(fee),
                state: MeltQuoteState::Unpaid,
                expiry: 0,
                payment_preimage: None,
                change: None,
            })
        }
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[tokio::test]
    async fn test_constant_fee_resolves_on_second_attempt() {
        let quoter = ScheduledQuoter::new(vec![10]);
        let quote = resolve(
            &quoter,
            TargetAmount::Source(Amount::from(1000)),
            ExchangeRate::IDENTITY,
            5,
        )
        .await
        .unwrap();

        assert_eq!(quote.attempts, 2);
        assert_eq!(quote.amount_to_mint, Amount::from(990));
        assert_eq!(
            quote.melt_quote.total_required().unwrap(),
            Amount::from(1000)
        );
    }

    #[tokio::test]
    async fn test_amount_too_small() {
        let quoter = ScheduledQuoter::new(vec![10]);
        let err = resolve(
            &quoter,
            TargetAmount::Source(Amount::from(5)),
            ExchangeRate::IDENTITY,
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AmountTooSmall));

        let err = resolve(
            &quoter,
            TargetAmount::Source(Amount::from(100)),
            ExchangeRate::new(0.001).unwrap(),
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AmountTooSmall));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        // Fee grows faster than the estimate shrinks
        let quoter = ScheduledQuoter::new(vec![10, 20, 40, 80, 160, 320]);
        let err = resolve(
            &quoter,
            TargetAmount::Source(Amount::from(10_000)),
            ExchangeRate::IDENTITY,
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoValidQuotes));
        assert_eq!(quoter.calls(), 5);
    }

    #[test]
    fn test_exchange_rate() {
        let rate = ExchangeRate::new(0.5).unwrap();
        assert_eq!(rate.to_destination(Amount::from(101)), Amount::from(50));
        assert_eq!(rate.to_source(Amount::from(50)), Amount::from(100));
        assert!(ExchangeRate::new(0.0).is_err());
        assert!(ExchangeRate::new(f64::NAN).is_err());
        assert!(ExchangeRate::new(-1.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_resolver_never_overshoots(
            target in 1u64..1_000_000,
            fees in prop::collection::vec(0u64..500, 1..8),
        ) {
            let quoter = ScheduledQuoter::new(fees);
            let res = block_on(resolve(
                &quoter,
                TargetAmount::Source(Amount::from(target)),
                ExchangeRate::IDENTITY,
                5,
            ));

            prop_assert!(quoter.calls() <= 5);
            match res {
                Ok(quote) => {
                    prop_assert!(quote.attempts <= 5);
                    prop_assert!(quote.melt_quote.total_required().unwrap() <= Amount::from(target));
                    prop_assert!(quote.amount_to_mint >= Amount::ONE);
                }
                Err(err) => prop_assert!(matches!(err, Error::NoValidQuotes | Error::AmountTooSmall)),
            }
        }

        #[test]
        fn prop_constant_fee_converges(target in 1u64..1_000_000, fee in 0u64..500) {
            let quoter = ScheduledQuoter::new(vec![fee]);
            let res = block_on(resolve(
                &quoter,
                TargetAmount::Source(Amount::from(target)),
                ExchangeRate::IDENTITY,
                5,
            ));

            if fee < target {
                let quote = res.unwrap();
                prop_assert!(quote.attempts <= 2);
                prop_assert_eq!(quote.amount_to_mint, Amount::from(target - fee));
            } else {
                prop_assert!(matches!(res, Err(Error::AmountTooSmall)));
            }
        }
    }
}
