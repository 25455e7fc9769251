//! Token swap lifecycle
//!
//! Claims an inbound token by swapping its proofs for outputs derived from
//! our seed. Only one swap of a given set of inputs can succeed at the mint,
//! which is what moves custody to us.
//!
//! ```text
//! prepare()  -> PENDING (outputs reserved on the account in the same write)
//!   └─> finalize()
//!         ├─ swap ok / already signed (restore) -> COMPLETED
//!         └─ definitive mint error              -> FAILED
//! ```

use std::sync::Arc;

use cdk_claim_common::database;
use cdk_claim_common::nuts::nut10::{self, Kind};
use cdk_claim_common::nuts::nut11::locking_pubkey;
use cdk_claim_common::wallet::{
    CashuAccount, CreateTokenSwap, TokenSwap, TokenSwapStatus, Versioned,
};
use cdk_claim_common::{
    Amount, ClaimDatabase, Error as CashuError, Proofs, ProofsMethods, SwapRequest, Token,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::claimability::claimable_proofs;
use crate::config::ClaimConfig;
use crate::fees::proofs_fee;
use crate::outputs::{
    construct, derive_outputs, is_already_issued, recover_reservation, reservation,
    restore_pre_mint,
};
use crate::registry::MintRegistry;
use crate::session::SessionContext;
use crate::util::{cancellable, fetch_account};
use crate::Error;

/// Sign the P2PK inputs locked to session keys
///
/// Inputs without a matching key are passed through unchanged.
pub(crate) fn sign_inputs(session: &SessionContext, proofs: &Proofs) -> Result<Proofs, Error> {
    let mut inputs = proofs.clone();
    for proof in inputs.iter_mut() {
        let Ok(Some(secret)) = nut10::Secret::parse(&proof.secret) else {
            continue;
        };
        if secret.kind != Kind::P2PK {
            continue;
        }
        let pubkey = locking_pubkey(&secret).map_err(CashuError::from)?;
        if let Some(secret_key) = session.p2pk_key(&pubkey)? {
            proof.sign_p2pk(&secret_key);
        }
    }
    Ok(inputs)
}

/// Token swap lifecycle
#[derive(Debug, Clone)]
pub struct TokenSwapService {
    db: Arc<dyn ClaimDatabase + Send + Sync>,
    registry: MintRegistry,
    session: SessionContext,
    conflict_retries: u32,
}

impl TokenSwapService {
    /// Create new [`TokenSwapService`]
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

    /// Persist a `PENDING` swap for `token`, reserving its outputs
    ///
    /// Returns the existing swap unchanged when the token was prepared
    /// before.
    #[instrument(skip(self, token, account, cancel), fields(account_id = %account.id))]
    pub async fn prepare(
        &self,
        user_id: &str,
        token: &Token,
        account: &Versioned<CashuAccount>,
        cancel: &CancellationToken,
    ) -> Result<Versioned<TokenSwap>, Error> {
        if account.user_id != user_id {
            return Err(Error::AccountMismatch(account.id.clone()));
        }

        let token_hash = token.token_hash()?;
        if let Some(swap) = cancellable(cancel, self.db.get_token_swap(&token_hash)).await? {
            if swap.account_id != account.id {
                return Err(Error::AccountMismatch(account.id.clone()));
            }
            tracing::debug!("Token {} already has a swap", token_hash);
            return Ok(swap);
        }

        if token.mint_url()? != account.mint_url {
            return Err(Error::IncorrectMint);
        }
        let unit = token.unit();
        if unit != account.unit {
            return Err(Error::UnsupportedUnit);
        }

        let proofs = claimable_proofs(&token.proofs(), &self.session.p2pk_pubkeys()?)
            .map_err(Error::CannotClaim)?;

        let keyset = cancellable(
            cancel,
            self.registry.active_keyset(&account.mint_url, &unit),
        )
        .await?;
        let keyset_fees = cancellable(cancel, self.registry.keyset_fees(&account.mint_url)).await?;

        let fee = proofs_fee(&proofs, &keyset_fees)?;
        let amount = proofs
            .total_amount()?
            .checked_sub(fee)
            .filter(|amount| *amount > Amount::ZERO)
            .ok_or(Error::AmountTooSmall)?;

        let outputs = reservation(keyset.id, account.counter(&keyset.id), amount);
        tracing::debug!(
            "Reserving counters {}..{} of keyset {} for token {}",
            outputs.keyset_counter,
            outputs.next_counter(),
            outputs.keyset_id,
            token_hash
        );

        let res = cancellable(
            cancel,
            self.db.create_token_swap(CreateTokenSwap {
                token_hash,
                token_proofs: proofs,
                account_id: account.id.clone(),
                user_id: user_id.to_string(),
                mint_url: account.mint_url.clone(),
                unit,
                amount,
                fee,
                outputs,
                account_version: account.version,
            }),
        )
        .await;

        match res {
            Ok((swap, _)) => {
                tracing::info!(
                    "Prepared swap of token {} for {} (fee {})",
                    swap.token_hash,
                    swap.amount,
                    swap.fee
                );
                Ok(swap)
            }
            Err(Error::Database(database::Error::Duplicate { entity, id })) => self
                .db
                .get_token_swap(&token_hash)
                .await?
                .ok_or(Error::Database(database::Error::NotFound { entity, id })),
            Err(err) => Err(err),
        }
    }

    /// Swap the token proofs for the reserved outputs
    ///
    /// A no-op for a completed swap. Ambiguous mint errors keep the swap
    /// `PENDING` for a later retry.
    #[instrument(skip_all, fields(token_hash = %swap.token_hash, account_id = %account.id))]
    pub async fn finalize(
        &self,
        account: &Versioned<CashuAccount>,
        swap: &Versioned<TokenSwap>,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error> {
        if swap.account_id != account.id {
            return Err(Error::AccountMismatch(account.id.clone()));
        }

        match swap.status() {
            TokenSwapStatus::Completed => return Ok((swap.clone(), account.clone())),
            TokenSwapStatus::Failed => {
                return Err(Error::InvalidSwapState {
                    id: swap.token_hash.to_string(),
                    status: TokenSwapStatus::Failed,
                })
            }
            TokenSwapStatus::Pending => {}
        }

        let proofs = self.swap_proofs(swap).await?;
        self.store_proofs(swap.clone(), account.clone(), proofs).await
    }

    async fn swap_proofs(&self, swap: &Versioned<TokenSwap>) -> Result<Proofs, Error> {
        let outputs = &swap.outputs;
        let connector = self.registry.connector(&swap.mint_url)?;
        let keys = self.registry.keys(&swap.mint_url, outputs.keyset_id).await?;
        let pre_mint = self
            .session
            .with_seed(|seed| derive_outputs(seed, outputs))??;
        let inputs = sign_inputs(&self.session, &swap.token_proofs)?;

        let err = match connector
            .post_swap(SwapRequest::new(inputs, pre_mint.blinded_messages()))
            .await
        {
            Ok(response) => return construct(&pre_mint, response.signatures, &keys),
            Err(err) => err,
        };

        if is_already_issued(&err) {
            tracing::info!(
                "Mint reports outputs of token {} already signed, restoring",
                swap.token_hash
            );
            return recover_reservation(connector.as_ref(), &pre_mint, outputs, &keys).await;
        }

        if matches!(err, CashuError::TokenAlreadySpent) {
            // Our own earlier swap may have spent the inputs
            let proofs = restore_pre_mint(connector.as_ref(), &pre_mint, &keys).await?;
            let expected = outputs.total_amount()?;
            let found = proofs.total_amount()?;

            if found == expected {
                tracing::info!("Restored swap of token {} after spent inputs", swap.token_hash);
                return Ok(proofs);
            }
            if found > Amount::ZERO {
                return Err(Error::RestoreIncomplete { expected, found });
            }

            let reason = err.to_string();
            self.db
                .fail_token_swap(&swap.token_hash, swap.version, reason.clone())
                .await?;
            tracing::warn!("Token {} was claimed by someone else", swap.token_hash);
            return Err(Error::SwapFailed(reason));
        }

        if err.is_definitive_failure() {
            let reason = err.to_string();
            self.db
                .fail_token_swap(&swap.token_hash, swap.version, reason.clone())
                .await?;
            tracing::warn!("Mint rejected swap of token {}: {}", swap.token_hash, reason);
            return Err(Error::SwapFailed(reason));
        }

        tracing::warn!(
            "Swap of token {} failed without a definitive answer: {}",
            swap.token_hash,
            err
        );
        match recover_reservation(connector.as_ref(), &pre_mint, outputs, &keys).await {
            Ok(proofs) => Ok(proofs),
            Err(restore_err) => {
                tracing::debug!("Restore probe of token {}: {}", swap.token_hash, restore_err);
                Err(err.into())
            }
        }
    }

    /// `PENDING -> COMPLETED`, refetching the account when only it went stale
    async fn store_proofs(
        &self,
        mut swap: Versioned<TokenSwap>,
        mut account: Versioned<CashuAccount>,
        proofs: Proofs,
    ) -> Result<(Versioned<TokenSwap>, Versioned<CashuAccount>), Error> {
        let mut attempts = 0;
        loop {
            let res = self
                .db
                .complete_token_swap(&swap.token_hash, swap.version, proofs.clone(), account.version)
                .await;

            let err = match res {
                Ok((swap, account)) => {
                    tracing::info!(
                        "Swap of token {} completed, {} {} added to account {}",
                        swap.token_hash,
                        swap.amount,
                        swap.unit,
                        account.id
                    );
                    return Ok((swap, account));
                }
                Err(err) if err.is_version_conflict() && attempts < self.conflict_retries => err,
                Err(err) => return Err(err.into()),
            };
            attempts += 1;

            let current = self
                .db
                .get_token_swap(&swap.token_hash)
                .await?
                .ok_or(Error::Database(err))?;
            if current.version != swap.version {
                let account = fetch_account(self.db.as_ref(), &account.id).await?;
                if current.status() == TokenSwapStatus::Completed {
                    return Ok((current, account));
                }
                return Err(Error::InvalidSwapState {
                    id: current.token_hash.to_string(),
                    status: current.status(),
                });
            }

            swap = current;
            account = fetch_account(self.db.as_ref(), &account.id).await?;
        }
    }
}
