//! Fake Mint
//!
//! In process mint used to test the claim engine. It signs real blind
//! signatures, keeps the spent set and the signed outputs needed by restore,
//! pushes NUT-17 mint quote updates, and lets tests inject faults and drive
//! quote states.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cdk_claim_common::dhke::{construct_proofs, sign_message, verify_message};
use cdk_claim_common::nuts::nut06::{Nuts, SupportedSetting};
use cdk_claim_common::nuts::nut10::{self, Kind};
use cdk_claim_common::nuts::nut17::{self, SupportedMethods};
use cdk_claim_common::secret::Secret;
use cdk_claim_common::util::unix_time;
use cdk_claim_common::{
    Amount, BlindSignature, BlindedMessage, CurrencyUnit, Error, Id, KeySet, KeySetInfo, Keys,
    KeysetResponse, MeltQuoteBolt11Request, MeltQuoteBolt11Response, MeltQuoteState, MeltRequest,
    MintConnector, MintInfo, MintQuoteBolt11Request, MintQuoteBolt11Response,
    MintQuoteSubscription, MintRequest, MintResponse, MintUrl, PaymentMethod, PreMintSecrets,
    Proof, Proofs, ProofsMethods, PublicKey, QuoteState, RestoreRequest, RestoreResponse,
    SecretKey, SwapRequest, SwapResponse,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

mod fault;
mod lightning;

pub use self::fault::{Endpoint, Fault};
pub use self::lightning::FakeLightning;

/// Fee reserve charged by a melt quote for an amount
pub type FeeReserveFn = Arc<dyn Fn(Amount) -> Amount + Send + Sync>;

const MAX_ORDER: u32 = 32;
const SUBSCRIPTION_BUFFER: usize = 64;

/// Default fee reserve: 1% with a minimum of 2
fn default_fee_reserve(amount: Amount) -> Amount {
    Amount::from(std::cmp::max(2, amount.to_u64().div_ceil(100)))
}

/// Builder for [`FakeMint`]
pub struct FakeMintBuilder {
    mint_url: MintUrl,
    unit: CurrencyUnit,
    input_fee_ppk: u64,
    websocket: bool,
    sats_per_unit: f64,
    fee_reserve: FeeReserveFn,
    quote_ttl: u64,
    lightning: FakeLightning,
}

impl fmt::Debug for FakeMintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeMintBuilder")
            .field("mint_url", &self.mint_url)
            .field("unit", &self.unit)
            .field("input_fee_ppk", &self.input_fee_ppk)
            .field("websocket", &self.websocket)
            .finish_non_exhaustive()
    }
}

impl FakeMintBuilder {
    /// New builder for a sat mint with websocket support and no fees
    pub fn new(mint_url: MintUrl) -> Self {
        Self {
            mint_url,
            unit: CurrencyUnit::Sat,
            input_fee_ppk: 0,
            websocket: true,
            sats_per_unit: 1.0,
            fee_reserve: Arc::new(default_fee_reserve),
            quote_ttl: 3600,
            lightning: FakeLightning::new(),
        }
    }

    /// Unit of the keyset
    pub fn unit(mut self, unit: CurrencyUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Input fee of the keyset in parts per thousand
    pub fn input_fee_ppk(mut self, input_fee_ppk: u64) -> Self {
        self.input_fee_ppk = input_fee_ppk;
        self
    }

    /// Advertise and serve NUT-17 mint quote subscriptions
    pub fn websocket(mut self, enabled: bool) -> Self {
        self.websocket = enabled;
        self
    }

    /// Price of one unit in sat
    pub fn sats_per_unit(mut self, sats_per_unit: f64) -> Self {
        self.sats_per_unit = sats_per_unit;
        self
    }

    /// Melt fee reserve function
    pub fn fee_reserve<F>(mut self, fee_reserve: F) -> Self
    where
        F: Fn(Amount) -> Amount + Send + Sync + 'static,
    {
        self.fee_reserve = Arc::new(fee_reserve);
        self
    }

    /// Lifetime of new quotes in seconds
    pub fn quote_ttl(mut self, quote_ttl: u64) -> Self {
        self.quote_ttl = quote_ttl;
        self
    }

    /// Lightning network shared with other fake mints
    pub fn lightning(mut self, lightning: FakeLightning) -> Self {
        self.lightning = lightning;
        self
    }

    /// Build the mint
    pub fn build(self) -> FakeMint {
        let mut secret_keys = BTreeMap::new();
        let mut public_keys = BTreeMap::new();
        for order in 0..MAX_ORDER {
            let amount = Amount::from(1u64 << order);
            let secret_key = SecretKey::generate();
            public_keys.insert(amount, secret_key.public_key());
            secret_keys.insert(amount, secret_key);
        }
        let keys = Keys::new(public_keys);
        let keyset_id = Id::v00_from_keys(&keys);

        let nut17 = if self.websocket {
            nut17::SupportedSettings {
                supported: vec![SupportedMethods {
                    method: PaymentMethod::Bolt11,
                    unit: self.unit.clone(),
                    commands: vec![nut17::Kind::Bolt11MintQuote.as_str().to_string()],
                }],
            }
        } else {
            nut17::SupportedSettings::default()
        };

        let info = MintInfo {
            name: Some(format!("fake mint {}", self.mint_url)),
            pubkey: None,
            version: None,
            nuts: Nuts {
                nut09: SupportedSetting { supported: true },
                nut17,
                nut20: SupportedSetting { supported: true },
            },
        };

        tracing::debug!(
            "Fake mint {} started with keyset {} ({})",
            self.mint_url,
            keyset_id,
            self.unit
        );

        FakeMint {
            inner: Arc::new(FakeMintInner {
                mint_url: self.mint_url,
                unit: self.unit,
                keyset_id,
                keys,
                secret_keys,
                input_fee_ppk: self.input_fee_ppk,
                websocket: self.websocket,
                info,
                sats_per_unit: self.sats_per_unit,
                fee_reserve: self.fee_reserve,
                quote_ttl: self.quote_ttl,
                lightning: self.lightning,
                state: Mutex::new(MintState::default()),
            }),
        }
    }
}

#[derive(Debug)]
struct MintQuoteEntry {
    response: MintQuoteBolt11Response,
    amount: Amount,
}

#[derive(Debug)]
struct Subscriber {
    quote_ids: HashSet<String>,
    sender: mpsc::Sender<Result<MintQuoteBolt11Response, Error>>,
}

#[derive(Debug, Default)]
struct MintState {
    mint_quotes: HashMap<String, MintQuoteEntry>,
    melt_quotes: HashMap<String, (MeltQuoteBolt11Response, String)>,
    /// Signatures by blinded secret
    signatures: HashMap<PublicKey, BlindSignature>,
    /// Ys of spent proofs
    spent: HashSet<PublicKey>,
    faults: HashMap<Endpoint, VecDeque<Fault>>,
    calls: HashMap<Endpoint, usize>,
    subscribers: Vec<Subscriber>,
    subscription_count: usize,
}

impl MintState {
    fn notify(&mut self, update: &MintQuoteBolt11Response) {
        self.subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in &self.subscribers {
            if subscriber.quote_ids.contains(&update.quote) {
                let _ = subscriber.sender.try_send(Ok(update.clone()));
            }
        }
    }
}

pub(crate) struct FakeMintInner {
    mint_url: MintUrl,
    unit: CurrencyUnit,
    keyset_id: Id,
    keys: Keys,
    secret_keys: BTreeMap<Amount, SecretKey>,
    input_fee_ppk: u64,
    websocket: bool,
    info: MintInfo,
    sats_per_unit: f64,
    fee_reserve: FeeReserveFn,
    quote_ttl: u64,
    lightning: FakeLightning,
    state: Mutex<MintState>,
}

impl fmt::Debug for FakeMintInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeMintInner")
            .field("mint_url", &self.mint_url)
            .field("unit", &self.unit)
            .field("keyset_id", &self.keyset_id)
            .finish_non_exhaustive()
    }
}

impl FakeMintInner {
    /// Mark a mint quote paid after its invoice settled
    pub(crate) fn mark_quote_paid(&self, quote_id: &str) {
        let mut state = self.state.lock();
        let Some(entry) = state.mint_quotes.get_mut(quote_id) else {
            return;
        };
        if entry.response.state != QuoteState::Unpaid {
            return;
        }
        entry.response.state = QuoteState::Paid;
        let update = entry.response.clone();
        state.notify(&update);
    }

    fn sat_to_unit(&self, amount_sat: Amount) -> Amount {
        Amount::from((amount_sat.to_u64() as f64 / self.sats_per_unit).ceil() as u64)
    }

    fn unit_to_sat(&self, amount: Amount) -> Amount {
        Amount::from((amount.to_u64() as f64 * self.sats_per_unit).ceil() as u64)
    }

    fn input_fee(&self, count: usize) -> Amount {
        Amount::from((count as u64 * self.input_fee_ppk).div_ceil(1000))
    }

    /// Record the call and take the next queued fault
    fn begin_call(&self, endpoint: Endpoint) -> Option<Fault> {
        let mut state = self.state.lock();
        *state.calls.entry(endpoint).or_default() += 1;
        state
            .faults
            .get_mut(&endpoint)
            .and_then(|faults| faults.pop_front())
    }

    fn call<T>(
        &self,
        endpoint: Endpoint,
        handler: impl FnOnce(&Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        match self.begin_call(endpoint) {
            None => handler(self),
            Some(fault) if fault.processes_request() => {
                handler(self)?;
                tracing::debug!("Fake mint {} processed then failed {:?}", self.mint_url, endpoint);
                Err(fault.into_error())
            }
            Some(fault) => {
                tracing::debug!("Fake mint {} failed {:?}", self.mint_url, endpoint);
                Err(fault.into_error())
            }
        }
    }

    /// Check every output before signing any of them
    fn sign_outputs(
        &self,
        state: &mut MintState,
        outputs: &[BlindedMessage],
    ) -> Result<Vec<BlindSignature>, Error> {
        let mut seen = HashSet::new();
        for output in outputs {
            if output.keyset_id != self.keyset_id {
                return Err(Error::UnknownKeySet);
            }
            if !self.secret_keys.contains_key(&output.amount) {
                return Err(Error::AmountKey);
            }
            if state.signatures.contains_key(&output.blinded_secret)
                || !seen.insert(output.blinded_secret)
            {
                return Err(Error::BlindedMessageAlreadySigned);
            }
        }

        let mut signatures = Vec::with_capacity(outputs.len());
        for output in outputs {
            let key = self.secret_keys.get(&output.amount).ok_or(Error::AmountKey)?;
            let signature = BlindSignature {
                amount: output.amount,
                keyset_id: self.keyset_id,
                c: sign_message(key, &output.blinded_secret)?,
            };
            state
                .signatures
                .insert(output.blinded_secret, signature.clone());
            signatures.push(signature);
        }
        Ok(signatures)
    }

    /// Verify inputs, returning their Ys
    fn verify_inputs(&self, state: &MintState, inputs: &Proofs) -> Result<Vec<PublicKey>, Error> {
        let mut ys = Vec::with_capacity(inputs.len());
        for proof in inputs {
            if proof.keyset_id != self.keyset_id {
                return Err(Error::UnknownKeySet);
            }
            let y = proof.y()?;
            if state.spent.contains(&y) || ys.contains(&y) {
                return Err(Error::TokenAlreadySpent);
            }
            let key = self.secret_keys.get(&proof.amount).ok_or(Error::AmountKey)?;
            verify_message(key, proof.c, proof.secret.as_bytes())?;

            match nut10::Secret::parse(&proof.secret) {
                Ok(None) => {}
                Ok(Some(secret)) if secret.kind == Kind::P2PK => proof
                    .verify_p2pk()
                    .map_err(|_| Error::SignatureMissingOrInvalid)?,
                Ok(Some(_)) | Err(_) => return Err(Error::SignatureMissingOrInvalid),
            }
            ys.push(y);
        }
        Ok(ys)
    }

    fn mint(&self, request: MintRequest) -> Result<MintResponse, Error> {
        let mut state = self.state.lock();
        let entry = state
            .mint_quotes
            .get(&request.quote)
            .ok_or(Error::UnknownQuote)?;

        match entry.response.state {
            QuoteState::Unpaid => return Err(Error::UnpaidQuote),
            QuoteState::Issued => return Err(Error::IssuedQuote),
            QuoteState::Paid => {}
        }
        if let Some(pubkey) = entry.response.pubkey {
            request.verify_signature(pubkey)?;
        }
        let total = request.total_amount()?;
        if total != entry.amount {
            return Err(Error::TransactionUnbalanced(
                entry.amount.to_u64(),
                total.to_u64(),
                0,
            ));
        }

        let signatures = self.sign_outputs(&mut state, &request.outputs)?;

        let update = match state.mint_quotes.get_mut(&request.quote) {
            Some(entry) => {
                entry.response.state = QuoteState::Issued;
                entry.response.clone()
            }
            None => return Err(Error::UnknownQuote),
        };
        state.notify(&update);

        Ok(MintResponse { signatures })
    }

    fn swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        let mut state = self.state.lock();
        let ys = self.verify_inputs(&state, &request.inputs)?;

        let inputs = request.inputs.total_amount()?;
        let outputs = Amount::try_sum(request.outputs.iter().map(|o| o.amount))?;
        let fee = self.input_fee(request.inputs.len());
        if inputs.checked_sub(fee) != Some(outputs) {
            return Err(Error::TransactionUnbalanced(
                inputs.to_u64(),
                outputs.to_u64(),
                fee.to_u64(),
            ));
        }

        let signatures = self.sign_outputs(&mut state, &request.outputs)?;
        state.spent.extend(ys);

        Ok(SwapResponse { signatures })
    }

    fn restore(&self, request: RestoreRequest) -> RestoreResponse {
        let state = self.state.lock();
        let (outputs, signatures) = request
            .outputs
            .into_iter()
            .filter_map(|output| {
                state
                    .signatures
                    .get(&output.blinded_secret)
                    .cloned()
                    .map(|signature| (output, signature))
            })
            .unzip();

        RestoreResponse {
            outputs,
            signatures,
        }
    }

    fn melt_quote(&self, request: MeltQuoteBolt11Request) -> Result<MeltQuoteBolt11Response, Error> {
        if request.unit != self.unit {
            return Err(Error::UnsupportedUnit);
        }
        let amount_sat = self
            .lightning
            .invoice_amount(&request.request)
            .ok_or_else(|| Error::Custom("Invalid payment request".to_string()))?;

        let amount = self.sat_to_unit(amount_sat);
        let response = MeltQuoteBolt11Response {
            quote: uuid::Uuid::new_v4().to_string(),
            amount,
            fee_reserve: (self.fee_reserve)(amount),
            state: MeltQuoteState::Unpaid,
            expiry: unix_time() + self.quote_ttl,
            payment_preimage: None,
            change: None,
        };

        self.state
            .lock()
            .melt_quotes
            .insert(response.quote.clone(), (response.clone(), request.request));

        Ok(response)
    }

    fn melt(&self, request: MeltRequest) -> Result<MeltQuoteBolt11Response, Error> {
        let (invoice, ys, change) = {
            let mut state = self.state.lock();
            let (quote, invoice) = state
                .melt_quotes
                .get(&request.quote)
                .cloned()
                .ok_or(Error::UnknownQuote)?;

            match quote.state {
                MeltQuoteState::Unpaid => {}
                MeltQuoteState::Pending => return Err(Error::PendingQuote),
                MeltQuoteState::Paid => return Err(Error::IssuedQuote),
            }
            if quote.expiry < unix_time() {
                return Err(Error::ExpiredQuote(quote.expiry, unix_time()));
            }

            let ys = self.verify_inputs(&state, &request.inputs)?;
            let inputs = request.inputs.total_amount()?;
            let fee = self.input_fee(request.inputs.len());
            let required = quote
                .total_required()
                .and_then(|required| required.checked_add(fee))
                .ok_or(Error::AmountOverflow)?;
            if inputs < required {
                return Err(Error::TransactionUnbalanced(
                    inputs.to_u64(),
                    required.to_u64(),
                    fee.to_u64(),
                ));
            }
            for output in request.outputs.iter().flatten() {
                if output.keyset_id != self.keyset_id {
                    return Err(Error::UnknownKeySet);
                }
                if state.signatures.contains_key(&output.blinded_secret) {
                    return Err(Error::BlindedMessageAlreadySigned);
                }
            }

            state.spent.extend(ys.iter().copied());
            if let Some((quote, _)) = state.melt_quotes.get_mut(&request.quote) {
                quote.state = MeltQuoteState::Pending;
            }
            // Lightning fees are zero, everything past the quote amount is change
            let change = inputs
                .checked_sub(fee)
                .and_then(|paid| paid.checked_sub(quote.amount))
                .unwrap_or(Amount::ZERO);
            (invoice, ys, change)
        };

        // The receiving mint may be this one, so pay without holding the lock
        let paid = self.lightning.pay(&invoice);

        let mut state = self.state.lock();
        if !state.melt_quotes.contains_key(&request.quote) {
            return Err(Error::UnknownQuote);
        }

        match paid {
            Ok(()) => {
                let signatures = match request.outputs {
                    Some(outputs) => {
                        // NUT-08: the mint sets the amounts of the blank outputs
                        let outputs: Vec<BlindedMessage> = outputs
                            .into_iter()
                            .zip(change.split())
                            .map(|(output, amount)| BlindedMessage { amount, ..output })
                            .collect();
                        Some(self.sign_outputs(&mut state, &outputs)?)
                    }
                    None => None,
                };
                let (quote, _) = state
                    .melt_quotes
                    .get_mut(&request.quote)
                    .ok_or(Error::UnknownQuote)?;
                quote.state = MeltQuoteState::Paid;
                quote.payment_preimage = Some(uuid::Uuid::new_v4().simple().to_string());
                Ok(MeltQuoteBolt11Response {
                    change: signatures,
                    ..quote.clone()
                })
            }
            Err(err) => {
                let Some((quote, _)) = state.melt_quotes.get_mut(&request.quote) else {
                    return Err(err);
                };
                quote.state = MeltQuoteState::Unpaid;
                for y in ys {
                    state.spent.remove(&y);
                }
                Err(err)
            }
        }
    }

    fn subscribe(&self, quote_ids: Vec<String>) -> Result<MintQuoteSubscription, Error> {
        if !self.websocket {
            return Err(Error::Websocket("subscriptions not supported".to_string()));
        }

        let mut state = self.state.lock();
        state.subscription_count += 1;
        let (sender, subscription) = MintQuoteSubscription::channel(
            format!("fake-sub-{}", state.subscription_count),
            SUBSCRIPTION_BUFFER,
        );

        for quote_id in &quote_ids {
            if let Some(entry) = state.mint_quotes.get(quote_id) {
                let _ = sender.try_send(Ok(entry.response.clone()));
            }
        }

        state.subscribers.push(Subscriber {
            quote_ids: quote_ids.into_iter().collect(),
            sender,
        });

        Ok(subscription)
    }
}

/// Fake mint
#[derive(Debug, Clone)]
pub struct FakeMint {
    inner: Arc<FakeMintInner>,
}

impl FakeMint {
    /// Fake sat mint with default settings
    pub fn new(mint_url: &str) -> Result<Self, Error> {
        Ok(FakeMintBuilder::new(MintUrl::from_str(mint_url)?).build())
    }

    /// Builder for a fake mint
    pub fn builder(mint_url: &str) -> Result<FakeMintBuilder, Error> {
        Ok(FakeMintBuilder::new(MintUrl::from_str(mint_url)?))
    }

    /// Active keyset id
    pub fn keyset_id(&self) -> Id {
        self.inner.keyset_id
    }

    /// Public keys of the active keyset
    pub fn keys(&self) -> &Keys {
        &self.inner.keys
    }

    /// Unit of the active keyset
    pub fn unit(&self) -> &CurrencyUnit {
        &self.inner.unit
    }

    /// Lightning network the mint uses
    pub fn lightning(&self) -> &FakeLightning {
        &self.inner.lightning
    }

    /// Queue a fault for the next call to an endpoint
    pub fn inject_fault(&self, endpoint: Endpoint, fault: Fault) {
        self.inner
            .state
            .lock()
            .faults
            .entry(endpoint)
            .or_default()
            .push_back(fault);
    }

    /// Number of calls an endpoint received
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .get(&endpoint)
            .copied()
            .unwrap_or_default()
    }

    /// Pay the invoice of a mint quote
    pub fn pay_quote(&self, quote_id: &str) -> Result<(), Error> {
        let request = self
            .inner
            .state
            .lock()
            .mint_quotes
            .get(quote_id)
            .map(|entry| entry.response.request.clone())
            .ok_or(Error::UnknownQuote)?;
        self.inner.lightning.pay(&request)
    }

    /// Force the state of a mint quote and notify subscribers
    pub fn set_quote_state(&self, quote_id: &str, quote_state: QuoteState) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        let entry = state
            .mint_quotes
            .get_mut(quote_id)
            .ok_or(Error::UnknownQuote)?;
        entry.response.state = quote_state;
        let update = entry.response.clone();
        state.notify(&update);
        Ok(())
    }

    /// Current state of a mint quote
    pub fn quote_state(&self, quote_id: &str) -> Option<QuoteState> {
        self.inner
            .state
            .lock()
            .mint_quotes
            .get(quote_id)
            .map(|entry| entry.response.state)
    }

    /// Current state of a melt quote
    pub fn melt_quote_state(&self, quote_id: &str) -> Option<MeltQuoteState> {
        self.inner
            .state
            .lock()
            .melt_quotes
            .get(quote_id)
            .map(|(quote, _)| quote.state)
    }

    /// Is the proof spent
    pub fn is_spent(&self, proof: &Proof) -> Result<bool, Error> {
        Ok(self.inner.state.lock().spent.contains(&proof.y()?))
    }

    /// Number of outputs the mint has signed
    pub fn signed_outputs(&self) -> usize {
        self.inner.state.lock().signatures.len()
    }

    /// Open quote subscriptions
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.subscribers.retain(|s| !s.sender.is_closed());
        state.subscribers.len()
    }

    /// Drop every open subscription, as a lost websocket would
    pub fn disconnect_subscriptions(&self) {
        let dropped = std::mem::take(&mut self.inner.state.lock().subscribers);
        tracing::debug!(
            "Fake mint {} dropped {} subscriptions",
            self.inner.mint_url,
            dropped.len()
        );
    }

    /// Issue unlocked proofs worth `amount`
    pub fn issue_proofs(&self, amount: Amount) -> Result<Proofs, Error> {
        let secrets = amount.split().iter().map(|_| Secret::generate()).collect();
        self.issue(amount, secrets)
    }

    /// Issue proofs worth `amount` locked to `pubkey` with NUT-11 P2PK
    pub fn issue_locked_proofs(&self, amount: Amount, pubkey: &PublicKey) -> Result<Proofs, Error> {
        let secrets = amount
            .split()
            .iter()
            .map(|_| Secret::try_from(&nut10::Secret::new(Kind::P2PK, pubkey.to_hex(), vec![])))
            .collect::<Result<_, _>>()?;
        self.issue(amount, secrets)
    }

    fn issue(&self, amount: Amount, secrets: Vec<Secret>) -> Result<Proofs, Error> {
        let mut pre_mint = PreMintSecrets::new(self.inner.keyset_id);
        for (amount, secret) in amount.split().into_iter().zip(secrets) {
            let (blinded_secret, r) =
                cdk_claim_common::dhke::blind_message(secret.as_bytes(), None)?;
            pre_mint.secrets.push(cdk_claim_common::PreMint {
                blinded_message: BlindedMessage::new(amount, self.inner.keyset_id, blinded_secret),
                secret,
                r,
                amount,
            });
        }

        let signatures = {
            let mut state = self.inner.state.lock();
            self.inner
                .sign_outputs(&mut state, &pre_mint.blinded_messages())?
        };

        Ok(construct_proofs(
            signatures,
            pre_mint.rs(),
            pre_mint.secrets(),
            &self.inner.keys,
        )?)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnector for FakeMint {
    fn mint_url(&self) -> &MintUrl {
        &self.inner.mint_url
    }

    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        self.inner
            .call(Endpoint::Info, |mint| Ok(mint.info.clone()))
    }

    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error> {
        self.inner.call(Endpoint::Keysets, |mint| {
            Ok(KeysetResponse {
                keysets: vec![KeySetInfo {
                    id: mint.keyset_id,
                    unit: mint.unit.clone(),
                    active: true,
                    input_fee_ppk: mint.input_fee_ppk,
                }],
            })
        })
    }

    async fn get_mint_keyset(&self, keyset_id: Id) -> Result<KeySet, Error> {
        self.inner.call(Endpoint::Keysets, |mint| {
            if keyset_id != mint.keyset_id {
                return Err(Error::UnknownKeySet);
            }
            Ok(KeySet {
                id: mint.keyset_id,
                unit: mint.unit.clone(),
                keys: mint.keys.clone(),
            })
        })
    }

    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.inner.call(Endpoint::MintQuote, |mint| {
            if request.unit != mint.unit {
                return Err(Error::UnsupportedUnit);
            }
            if request.amount == Amount::ZERO {
                return Err(Error::TransactionUnbalanced(0, 0, 0));
            }

            let quote_id = uuid::Uuid::new_v4().to_string();
            let invoice = mint.lightning.create_invoice(
                &self.inner,
                &quote_id,
                mint.unit_to_sat(request.amount),
            );

            let response = MintQuoteBolt11Response {
                quote: quote_id.clone(),
                request: invoice,
                amount: Some(request.amount),
                unit: Some(mint.unit.clone()),
                state: QuoteState::Unpaid,
                expiry: Some(unix_time() + mint.quote_ttl),
                pubkey: request.pubkey,
            };

            mint.state.lock().mint_quotes.insert(
                quote_id,
                MintQuoteEntry {
                    response: response.clone(),
                    amount: request.amount,
                },
            );

            Ok(response)
        })
    }

    async fn get_mint_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.inner.call(Endpoint::MintQuoteStatus, |mint| {
            mint.state
                .lock()
                .mint_quotes
                .get(quote_id)
                .map(|entry| entry.response.clone())
                .ok_or(Error::UnknownQuote)
        })
    }

    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error> {
        self.inner
            .call(Endpoint::Mint, move |mint| mint.mint(request))
    }

    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.inner
            .call(Endpoint::MeltQuote, move |mint| mint.melt_quote(request))
    }

    async fn post_melt(&self, request: MeltRequest) -> Result<MeltQuoteBolt11Response, Error> {
        self.inner
            .call(Endpoint::Melt, move |mint| mint.melt(request))
    }

    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        self.inner
            .call(Endpoint::Swap, move |mint| mint.swap(request))
    }

    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error> {
        self.inner
            .call(Endpoint::Restore, move |mint| Ok(mint.restore(request)))
    }

    async fn subscribe_mint_quotes(
        &self,
        quote_ids: Vec<String>,
    ) -> Result<MintQuoteSubscription, Error> {
        self.inner
            .call(Endpoint::Subscribe, move |mint| mint.subscribe(quote_ids))
    }
}
