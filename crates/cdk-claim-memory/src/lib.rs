//! Claim engine in memory database
//!
//! All tables sit behind one lock so that multi-row writes are atomic and
//! version checks and the write happen under the same guard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cdk_claim_common::database::{ChangeEvent, ClaimDatabase, Entity, Error, Row};
use cdk_claim_common::nuts::Proofs;
use cdk_claim_common::token::TokenHash;
use cdk_claim_common::util::unix_time;
use cdk_claim_common::wallet::{
    CashuAccount, CreateReceiveQuote, CreateTokenSwap, OutputReservation,
    ProcessReceiveQuotePayment, ReceiveQuote, ReceiveQuoteKind, ReceiveQuoteState,
    ReceiveQuoteStatus, TokenSwap, TokenSwapState, Versioned,
};
use tokio::sync::{broadcast, RwLock};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Versioned<CashuAccount>>,
    receive_quotes: HashMap<String, Versioned<ReceiveQuote>>,
    token_swaps: HashMap<TokenHash, Versioned<TokenSwap>>,
}

/// Claim engine in Memory Database
#[derive(Debug, Clone)]
pub struct MemoryClaimDatabase {
    tables: Arc<RwLock<Tables>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryClaimDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClaimDatabase {
    /// Create new [`MemoryClaimDatabase`]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            changes,
        }
    }

    /// Insert or replace an account at version 0
    ///
    /// Accounts are managed outside of the claim engine, this is how hosts
    /// and tests seed them.
    pub async fn add_account(&self, account: CashuAccount) -> Versioned<CashuAccount> {
        let account = Versioned::new(account, 0);
        self.tables
            .write()
            .await
            .accounts
            .insert(account.id.clone(), account.clone());
        self.notify(ChangeEvent::Created(Row::Account(account.clone())));
        account
    }

    /// Signal subscribers that the change channel reconnected
    pub fn emit_reconnect(&self) {
        self.notify(ChangeEvent::Reconnected);
    }

    fn notify(&self, event: ChangeEvent) {
        // No receivers is fine
        let _ = self.changes.send(event);
    }
}

fn check_version<T>(
    row: &Versioned<T>,
    expected: u32,
    entity: Entity,
    id: &str,
) -> Result<(), Error> {
    if row.version != expected {
        tracing::debug!(
            "Stale {} write on {}: expected {}, current {}",
            entity,
            id,
            expected,
            row.version
        );
        return Err(Error::VersionConflict {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn not_found(entity: Entity, id: &str) -> Error {
    Error::NotFound {
        entity,
        id: id.to_string(),
    }
}

/// Move the account counter for the reserved keyset past the reservation
fn reserve_counters(
    account: &mut CashuAccount,
    outputs: &OutputReservation,
) -> Result<(), Error> {
    let current = account.counter(&outputs.keyset_id);
    if outputs.keyset_counter < current {
        return Err(Error::CounterRegression(account.id.clone()));
    }
    account
        .keyset_counters
        .insert(outputs.keyset_id, outputs.next_counter());
    Ok(())
}

impl Tables {
    fn account_mut(
        &mut self,
        account_id: &str,
        version: u32,
    ) -> Result<&mut Versioned<CashuAccount>, Error> {
        let account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(Entity::Account, account_id))?;
        check_version(account, version, Entity::Account, account_id)?;
        Ok(account)
    }

    fn quote_mut(&mut self, id: &str, version: u32) -> Result<&mut Versioned<ReceiveQuote>, Error> {
        let quote = self
            .receive_quotes
            .get_mut(id)
            .ok_or_else(|| not_found(Entity::ReceiveQuote, id))?;
        check_version(quote, version, Entity::ReceiveQuote, id)?;
        Ok(quote)
    }

    fn swap_mut(
        &mut self,
        token_hash: &TokenHash,
        version: u32,
    ) -> Result<&mut Versioned<TokenSwap>, Error> {
        let id = token_hash.to_string();
        let swap = self
            .token_swaps
            .get_mut(token_hash)
            .ok_or_else(|| not_found(Entity::TokenSwap, &id))?;
        check_version(swap, version, Entity::TokenSwap, &id)?;
        Ok(swap)
    }
}

fn invalid_transition(entity: Entity, id: &str, from: impl ToString) -> Error {
    Error::InvalidTransition {
        entity,
        id: id.to_string(),
        from: from.to_string(),
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ClaimDatabase for MemoryClaimDatabase {
    async fn get_account(
        &self,
        account_id: &str,
    ) -> Result<Option<Versioned<CashuAccount>>, Error> {
        Ok(self.tables.read().await.accounts.get(account_id).cloned())
    }

    async fn get_user_accounts(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<CashuAccount>>, Error> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Versioned<CashuAccount>> = tables
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn reserve_account_counters(
        &self,
        account_id: &str,
        version: u32,
        outputs: &OutputReservation,
    ) -> Result<Versioned<CashuAccount>, Error> {
        let mut tables = self.tables.write().await;
        let account = tables.account_mut(account_id, version)?;
        let mut updated_account = account.value.clone();
        reserve_counters(&mut updated_account, outputs)?;
        account.value = updated_account;
        account.version += 1;
        let account = account.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok(account)
    }

    async fn add_account_proofs(
        &self,
        account_id: &str,
        version: u32,
        proofs: Proofs,
    ) -> Result<Versioned<CashuAccount>, Error> {
        let mut tables = self.tables.write().await;
        let account = tables.account_mut(account_id, version)?;
        account.value.proofs.extend(proofs);
        account.version += 1;
        let account = account.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok(account)
    }

    async fn get_receive_quote(&self, id: &str) -> Result<Option<Versioned<ReceiveQuote>>, Error> {
        Ok(self.tables.read().await.receive_quotes.get(id).cloned())
    }

    async fn get_receive_quotes_by_token_hash(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Vec<Versioned<ReceiveQuote>>, Error> {
        let tables = self.tables.read().await;
        let mut quotes: Vec<Versioned<ReceiveQuote>> = tables
            .receive_quotes
            .values()
            .filter(|q| {
                matches!(
                    &q.kind,
                    ReceiveQuoteKind::CashuToken { token_hash: hash, .. } if hash == token_hash
                )
            })
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        Ok(quotes)
    }

    async fn get_pending_receive_quotes(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<ReceiveQuote>>, Error> {
        let tables = self.tables.read().await;
        let mut quotes: Vec<Versioned<ReceiveQuote>> = tables
            .receive_quotes
            .values()
            .filter(|q| q.user_id == user_id && !q.status().is_terminal())
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        Ok(quotes)
    }

    async fn create_receive_quote(
        &self,
        params: CreateReceiveQuote,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        let quote = ReceiveQuote {
            id: uuid::Uuid::new_v4().to_string(),
            quote_id: params.quote_id,
            account_id: params.account_id,
            user_id: params.user_id,
            mint_url: params.mint_url,
            amount: params.amount,
            currency: params.currency,
            unit: params.unit,
            payment_request: params.payment_request,
            locking_derivation_path: params.locking_derivation_path,
            expires_at: params.expires_at,
            description: params.description,
            kind: params.kind,
            created_at: unix_time(),
            state: ReceiveQuoteState::Unpaid,
        };

        let mut tables = self.tables.write().await;
        if tables
            .receive_quotes
            .values()
            .any(|q| q.quote_id == quote.quote_id && q.mint_url == quote.mint_url)
        {
            return Err(Error::Duplicate {
                entity: Entity::ReceiveQuote,
                id: quote.quote_id,
            });
        }

        let quote = Versioned::new(quote, 0);
        tables.receive_quotes.insert(quote.id.clone(), quote.clone());
        drop(tables);

        self.notify(ChangeEvent::Created(Row::ReceiveQuote(quote.clone())));
        Ok(quote)
    }

    async fn expire_receive_quote(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        let mut tables = self.tables.write().await;
        let quote = tables.quote_mut(id, version)?;
        if quote.status() != ReceiveQuoteStatus::Unpaid {
            return Err(invalid_transition(Entity::ReceiveQuote, id, quote.status()));
        }

        quote.value.state = ReceiveQuoteState::Expired;
        quote.version += 1;
        let quote = quote.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::ReceiveQuote(quote.clone())));
        Ok(quote)
    }

    async fn fail_receive_quote(
        &self,
        id: &str,
        version: u32,
        reason: String,
    ) -> Result<Versioned<ReceiveQuote>, Error> {
        let mut tables = self.tables.write().await;
        let quote = tables.quote_mut(id, version)?;
        if quote.status().is_terminal() {
            return Err(invalid_transition(Entity::ReceiveQuote, id, quote.status()));
        }

        quote.value.state = ReceiveQuoteState::Failed { reason };
        quote.version += 1;
        let quote = quote.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::ReceiveQuote(quote.clone())));
        Ok(quote)
    }

    async fn process_receive_quote_payment(
        &self,
        params: ProcessReceiveQuotePayment,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error> {
        let mut tables = self.tables.write().await;

        // Validate both rows before touching either
        let quote = tables.quote_mut(&params.quote_id, params.quote_version)?;
        if quote.status() != ReceiveQuoteStatus::Unpaid {
            return Err(invalid_transition(
                Entity::ReceiveQuote,
                &params.quote_id,
                quote.status(),
            ));
        }
        let account_id = quote.account_id.clone();

        let account = tables.account_mut(&account_id, params.account_version)?;
        let mut updated_account = account.value.clone();
        reserve_counters(&mut updated_account, &params.outputs)?;
        account.value = updated_account;
        account.version += 1;
        let account = account.clone();

        let quote = tables.quote_mut(&params.quote_id, params.quote_version)?;
        quote.value.state = ReceiveQuoteState::Paid(params.outputs);
        quote.version += 1;
        let quote = quote.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::ReceiveQuote(quote.clone())));
        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok((quote, account))
    }

    async fn complete_receive_quote(
        &self,
        id: &str,
        quote_version: u32,
        proofs: Proofs,
        account_version: u32,
    ) -> Result<(Versioned<ReceiveQuote>, Versioned<CashuAccount>), Error> {
        let mut tables = self.tables.write().await;

        let quote = tables.quote_mut(id, quote_version)?;
        let outputs = match &quote.state {
            ReceiveQuoteState::Paid(outputs) => outputs.clone(),
            other => {
                return Err(invalid_transition(
                    Entity::ReceiveQuote,
                    id,
                    other.status(),
                ))
            }
        };
        let account_id = quote.account_id.clone();

        let account = tables.account_mut(&account_id, account_version)?;
        account.value.proofs.extend(proofs);
        account.version += 1;
        let account = account.clone();

        let quote = tables.quote_mut(id, quote_version)?;
        quote.value.state = ReceiveQuoteState::Completed(outputs);
        quote.version += 1;
        let quote = quote.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::ReceiveQuote(quote.clone())));
        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok((quote, account))
    }

    async fn get_token_swap(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<Versioned<TokenSwap>>, Error> {
        Ok(self.tables.read().await.token_swaps.get(token_hash).cloned())
    }

    async fn get_pending_token_swaps(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<TokenSwap>>, Error> {
        let tables = self.tables.read().await;
        let mut swaps: Vec<Versioned<TokenSwap>> = tables
            .token_swaps
            .values()
            .filter(|s| s.user_id == user_id && s.state == TokenSwapState::Pending)
            .cloned()
            .collect();
        swaps.sort_by_key(|s| s.created_at);
        Ok(swaps)
    }

    async fn create_token_swap(
        &self,
        params: CreateTokenSwap,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error> {
        let mut tables = self.tables.write().await;

        if tables.token_swaps.contains_key(&params.token_hash) {
            return Err(Error::Duplicate {
                entity: Entity::TokenSwap,
                id: params.token_hash.to_string(),
            });
        }

        let account = tables.account_mut(&params.account_id, params.account_version)?;
        let mut updated_account = account.value.clone();
        reserve_counters(&mut updated_account, &params.outputs)?;
        account.value = updated_account;
        account.version += 1;
        let account = account.clone();

        let swap = Versioned::new(
            TokenSwap {
                token_hash: params.token_hash,
                token_proofs: params.token_proofs,
                account_id: params.account_id,
                user_id: params.user_id,
                mint_url: params.mint_url,
                unit: params.unit,
                amount: params.amount,
                fee: params.fee,
                outputs: params.outputs,
                created_at: unix_time(),
                state: TokenSwapState::Pending,
            },
            0,
        );
        tables.token_swaps.insert(swap.token_hash, swap.clone());
        drop(tables);

        self.notify(ChangeEvent::Created(Row::TokenSwap(swap.clone())));
        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok((swap, account))
    }

    async fn complete_token_swap(
        &self,
        token_hash: &TokenHash,
        swap_version: u32,
        proofs: Proofs,
        account_version: u32,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error> {
        let mut tables = self.tables.write().await;

        let swap = tables.swap_mut(token_hash, swap_version)?;
        if swap.state != TokenSwapState::Pending {
            return Err(invalid_transition(
                Entity::TokenSwap,
                &token_hash.to_string(),
                swap.status(),
            ));
        }
        let account_id = swap.account_id.clone();

        let account = tables.account_mut(&account_id, account_version)?;
        account.value.proofs.extend(proofs);
        account.version += 1;
        let account = account.clone();

        let swap = tables.swap_mut(token_hash, swap_version)?;
        swap.value.state = TokenSwapState::Completed;
        swap.version += 1;
        let swap = swap.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::TokenSwap(swap.clone())));
        self.notify(ChangeEvent::Updated(Row::Account(account.clone())));
        Ok((swap, account))
    }

    async fn fail_token_swap(
        &self,
        token_hash: &TokenHash,
        version: u32,
        reason: String,
    ) -> Result<Versioned<TokenSwap>, Error> {
        let mut tables = self.tables.write().await;

        let swap = tables.swap_mut(token_hash, version)?;
        if swap.state != TokenSwapState::Pending {
            return Err(invalid_transition(
                Entity::TokenSwap,
                &token_hash.to_string(),
                swap.status(),
            ));
        }
        swap.value.state = TokenSwapState::Failed { reason };
        swap.version += 1;
        let swap = swap.clone();
        drop(tables);

        self.notify(ChangeEvent::Updated(Row::TokenSwap(swap.clone())));
        Ok(swap)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use cdk_claim_common::nuts::{CurrencyUnit, Id};
    use cdk_claim_common::wallet::Currency;
    use cdk_claim_common::{Amount, MintUrl};

    use super::*;

    fn keyset_id() -> Id {
        Id::from_str("009a1f293253e41e").unwrap()
    }

    fn account() -> CashuAccount {
        CashuAccount {
            id: "account-1".to_string(),
            user_id: "user-1".to_string(),
            mint_url: MintUrl::from_str("https://mint.example.com").unwrap(),
            currency: Currency::Btc,
            unit: CurrencyUnit::Sat,
            proofs: vec![],
            keyset_counters: HashMap::from([(keyset_id(), 7)]),
        }
    }

    fn create_params(quote_id: &str) -> CreateReceiveQuote {
        CreateReceiveQuote {
            quote_id: quote_id.to_string(),
            account_id: "account-1".to_string(),
            user_id: "user-1".to_string(),
            mint_url: MintUrl::from_str("https://mint.example.com").unwrap(),
            amount: Amount::from(1000),
            currency: Currency::Btc,
            unit: CurrencyUnit::Sat,
            payment_request: "lnbc10u1fake".to_string(),
            locking_derivation_path: "m/129372'/0'/1'/0'".parse().unwrap(),
            expires_at: unix_time() + 600,
            description: None,
            kind: ReceiveQuoteKind::Lightning,
        }
    }

    fn reservation(counter: u32) -> OutputReservation {
        OutputReservation {
            keyset_id: keyset_id(),
            keyset_counter: counter,
            output_amounts: Amount::from(1000).split(),
        }
    }

    #[tokio::test]
    async fn test_process_payment_reserves_counter_atomically() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;

        let quote = db.create_receive_quote(create_params("q1")).await.unwrap();
        assert_eq!(quote.version, 0);
        assert_eq!(
            db.get_pending_receive_quotes("user-1").await.unwrap().len(),
            1
        );

        let (quote, account) = db
            .process_receive_quote_payment(ProcessReceiveQuotePayment {
                quote_id: quote.id.clone(),
                quote_version: 0,
                outputs: reservation(7),
                account_version: 0,
            })
            .await
            .unwrap();

        assert_eq!(quote.status(), ReceiveQuoteStatus::Paid);
        assert_eq!(quote.version, 1);
        assert_eq!(account.version, 1);
        assert_eq!(account.counter(&keyset_id()), 13);
    }

    #[tokio::test]
    async fn test_stale_writes_change_nothing() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;
        let quote = db.create_receive_quote(create_params("q1")).await.unwrap();

        // Stale account version leaves the quote untouched
        let err = db
            .process_receive_quote_payment(ProcessReceiveQuotePayment {
                quote_id: quote.id.clone(),
                quote_version: 0,
                outputs: reservation(7),
                account_version: 3,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                entity: Entity::Account,
                ..
            }
        ));

        let stored = db.get_receive_quote(&quote.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), ReceiveQuoteStatus::Unpaid);
        assert_eq!(stored.version, 0);
        let stored_account = db.get_account("account-1").await.unwrap().unwrap();
        assert_eq!(stored_account.counter(&keyset_id()), 7);

        let err = db.expire_receive_quote(&quote.id, 5).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_counter_never_decreases() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;
        let quote = db.create_receive_quote(create_params("q1")).await.unwrap();

        let err = db
            .process_receive_quote_payment(ProcessReceiveQuotePayment {
                quote_id: quote.id.clone(),
                quote_version: 0,
                outputs: reservation(2),
                account_version: 0,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CounterRegression(_)));
    }

    #[tokio::test]
    async fn test_swap_duplicate_hash_rejected() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;

        let token_hash = TokenHash::from_str(
            "8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c",
        )
        .unwrap();

        let params = CreateTokenSwap {
            token_hash,
            token_proofs: vec![],
            account_id: "account-1".to_string(),
            user_id: "user-1".to_string(),
            mint_url: MintUrl::from_str("https://mint.example.com").unwrap(),
            unit: CurrencyUnit::Sat,
            amount: Amount::from(1000),
            fee: Amount::ZERO,
            outputs: reservation(7),
            account_version: 0,
        };

        let (swap, account) = db.create_token_swap(params.clone()).await.unwrap();
        assert_eq!(swap.version, 0);
        assert_eq!(account.counter(&keyset_id()), 13);

        let err = db
            .create_token_swap(CreateTokenSwap {
                account_version: 1,
                ..params
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));

        let (swap, account) = db
            .complete_token_swap(&token_hash, 0, vec![], 1)
            .await
            .unwrap();
        assert_eq!(swap.state, TokenSwapState::Completed);
        assert_eq!(account.version, 2);
        assert!(db.get_pending_token_swaps("user-1").await.unwrap().is_empty());

        let err = db
            .fail_token_swap(&token_hash, 1, "late".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_quotes_found_by_token_hash_in_any_state() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;

        let token_hash = TokenHash::from_str(
            "8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c1c5a2f4b8a7c",
        )
        .unwrap();
        let bridged = CreateReceiveQuote {
            kind: ReceiveQuoteKind::CashuToken {
                source_mint_url: MintUrl::from_str("https://source.example.com").unwrap(),
                melt_quote_id: "melt-1".to_string(),
                token_hash,
                change: None,
            },
            ..create_params("q1")
        };
        let quote = db.create_receive_quote(bridged).await.unwrap();
        db.create_receive_quote(create_params("q2")).await.unwrap();

        db.fail_receive_quote(&quote.id, 0, "melt rejected".to_string())
            .await
            .unwrap();

        let found = db.get_receive_quotes_by_token_hash(&token_hash).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, quote.id);
        assert_eq!(found[0].status(), ReceiveQuoteStatus::Failed);
    }

    #[tokio::test]
    async fn test_account_only_writes_check_version() {
        let db = MemoryClaimDatabase::new();
        db.add_account(account()).await;

        let account = db
            .reserve_account_counters("account-1", 0, &reservation(7))
            .await
            .unwrap();
        assert_eq!(account.version, 1);
        assert_eq!(account.counter(&keyset_id()), 13);

        let err = db
            .reserve_account_counters("account-1", 1, &reservation(9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CounterRegression(_)));

        let err = db
            .add_account_proofs("account-1", 0, vec![])
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());

        let account = db.add_account_proofs("account-1", 1, vec![]).await.unwrap();
        assert_eq!(account.version, 2);
        assert_eq!(db.get_user_accounts("user-1").await.unwrap(), vec![account]);
        assert!(db.get_user_accounts("user-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let db = MemoryClaimDatabase::new();
        let mut changes = db.subscribe_changes();

        db.add_account(account()).await;
        db.emit_reconnect();

        assert!(matches!(
            changes.recv().await.unwrap(),
            ChangeEvent::Created(Row::Account(_))
        ));
        assert_eq!(changes.recv().await.unwrap(), ChangeEvent::Reconnected);
    }
}
