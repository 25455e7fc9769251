//! Mint registry
//!
//! Maps mint urls to their connectors and caches what the engine reads on
//! every claim: mint info, keysets and keyset keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cdk_claim_common::{
    CurrencyUnit, Id, KeySetInfo, Keys, MintConnector, MintInfo, MintUrl, PaymentMethod,
};
use parking_lot::RwLock;
use tracing::instrument;

use crate::mint_connector::HttpClient;
use crate::Error;

#[derive(Default)]
struct MintEntry {
    info: Option<MintInfo>,
    keysets: Option<Vec<KeySetInfo>>,
    keys: HashMap<Id, Keys>,
}

/// Connectors and cached metadata of known mints
#[derive(Clone, Default)]
pub struct MintRegistry {
    connectors: Arc<RwLock<HashMap<MintUrl, Arc<dyn MintConnector + Send + Sync>>>>,
    cache: Arc<RwLock<HashMap<MintUrl, MintEntry>>>,
}

impl fmt::Debug for MintRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintRegistry")
            .field("mints", &self.connectors.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MintRegistry {
    /// Create new [`MintRegistry`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its mint url
    pub fn add(&self, connector: Arc<dyn MintConnector + Send + Sync>) {
        let mint_url = connector.mint_url().clone();
        self.cache.write().remove(&mint_url);
        self.connectors.write().insert(mint_url, connector);
    }

    /// Register a mint reached over HTTP
    pub fn add_http(&self, mint_url: MintUrl) {
        self.add(Arc::new(HttpClient::new(mint_url)));
    }

    /// Connector of a registered mint
    pub fn connector(
        &self,
        mint_url: &MintUrl,
    ) -> Result<Arc<dyn MintConnector + Send + Sync>, Error> {
        self.connectors
            .read()
            .get(mint_url)
            .cloned()
            .ok_or_else(|| Error::UnknownMint(mint_url.clone()))
    }

    /// Registered mint urls
    pub fn mint_urls(&self) -> Vec<MintUrl> {
        self.connectors.read().keys().cloned().collect()
    }

    /// Mint info, fetched once
    #[instrument(skip(self))]
    pub async fn mint_info(&self, mint_url: &MintUrl) -> Result<MintInfo, Error> {
        let cached = self
            .cache
            .read()
            .get(mint_url)
            .and_then(|entry| entry.info.clone());
        if let Some(info) = cached {
            return Ok(info);
        }

        let info = self.connector(mint_url)?.get_mint_info().await?;
        self.cache
            .write()
            .entry(mint_url.clone())
            .or_default()
            .info = Some(info.clone());
        Ok(info)
    }

    /// Keysets of a mint, fetched once
    #[instrument(skip(self))]
    pub async fn keysets(&self, mint_url: &MintUrl) -> Result<Vec<KeySetInfo>, Error> {
        let cached = self
            .cache
            .read()
            .get(mint_url)
            .and_then(|entry| entry.keysets.clone());
        if let Some(keysets) = cached {
            return Ok(keysets);
        }

        let keysets = self.connector(mint_url)?.get_mint_keysets().await?.keysets;
        self.cache
            .write()
            .entry(mint_url.clone())
            .or_default()
            .keysets = Some(keysets.clone());
        Ok(keysets)
    }

    /// Active keyset of a unit
    ///
    /// Picks the lowest fee keyset when the mint has several active ones.
    pub async fn active_keyset(
        &self,
        mint_url: &MintUrl,
        unit: &CurrencyUnit,
    ) -> Result<KeySetInfo, Error> {
        self.keysets(mint_url)
            .await?
            .into_iter()
            .filter(|keyset| keyset.active && &keyset.unit == unit)
            .min_by_key(|keyset| keyset.input_fee_ppk)
            .ok_or(Error::NoActiveKeyset)
    }

    /// Keys of a keyset
    ///
    /// Keys of version 00 keysets are checked against the keyset id before
    /// they are cached.
    #[instrument(skip(self))]
    pub async fn keys(&self, mint_url: &MintUrl, keyset_id: Id) -> Result<Keys, Error> {
        let cached = self
            .cache
            .read()
            .get(mint_url)
            .and_then(|entry| entry.keys.get(&keyset_id).cloned());
        if let Some(keys) = cached {
            return Ok(keys);
        }

        let keyset = self.connector(mint_url)?.get_mint_keyset(keyset_id).await?;
        if keyset.id != keyset_id {
            return Err(cdk_claim_common::Error::InvalidMintResponse(format!(
                "asked for keyset {keyset_id}, got {}",
                keyset.id
            ))
            .into());
        }
        if keyset_id.get_version() == cdk_claim_common::KeySetVersion::Version00
            && Id::v00_from_keys(&keyset.keys) != keyset_id
        {
            return Err(cdk_claim_common::Error::InvalidMintResponse(format!(
                "keys do not match keyset {keyset_id}"
            ))
            .into());
        }

        self.cache
            .write()
            .entry(mint_url.clone())
            .or_default()
            .keys
            .insert(keyset_id, keyset.keys.clone());
        Ok(keyset.keys)
    }

    /// Input fee per thousand proofs of every keyset of the mint
    pub async fn keyset_fees(&self, mint_url: &MintUrl) -> Result<HashMap<Id, u64>, Error> {
        Ok(self
            .keysets(mint_url)
            .await?
            .into_iter()
            .map(|keyset| (keyset.id, keyset.input_fee_ppk))
            .collect())
    }

    /// Does the mint push bolt11 mint quote updates for the unit
    pub async fn supports_quote_updates(
        &self,
        mint_url: &MintUrl,
        unit: &CurrencyUnit,
    ) -> Result<bool, Error> {
        Ok(self
            .mint_info(mint_url)
            .await?
            .supports_mint_quote_updates(&PaymentMethod::Bolt11, unit))
    }

    /// Drop cached info and keysets of a mint, keys are immutable and kept
    pub fn refresh(&self, mint_url: &MintUrl) {
        if let Some(entry) = self.cache.write().get_mut(mint_url) {
            entry.info = None;
            entry.keysets = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use cdk_claim_fake_mint::{Endpoint, FakeMint};

    use super::*;

    #[tokio::test]
    async fn test_metadata_is_cached() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let registry = MintRegistry::new();
        registry.add(Arc::new(mint.clone()));

        let url = mint.mint_url().clone();
        let keyset = registry.active_keyset(&url, &CurrencyUnit::Sat).await.unwrap();
        assert_eq!(keyset.id, mint.keyset_id());
        registry.active_keyset(&url, &CurrencyUnit::Sat).await.unwrap();

        let keys = registry.keys(&url, keyset.id).await.unwrap();
        assert_eq!(&keys, mint.keys());
        registry.keys(&url, keyset.id).await.unwrap();

        assert_eq!(mint.calls(Endpoint::Keysets), 2);

        registry.refresh(&url);
        registry.keysets(&url).await.unwrap();
        assert_eq!(mint.calls(Endpoint::Keysets), 3);
    }

    #[tokio::test]
    async fn test_unknown_mint_and_unit() {
        let mint = FakeMint::new("https://mint.example.com").unwrap();
        let registry = MintRegistry::new();

        let url = mint.mint_url().clone();
        assert!(matches!(registry.connector(&url), Err(Error::UnknownMint(_))));

        registry.add(Arc::new(mint));
        assert!(matches!(
            registry.active_keyset(&url, &CurrencyUnit::Usd).await,
            Err(Error::NoActiveKeyset)
        ));
        assert!(registry
            .supports_quote_updates(&url, &CurrencyUnit::Sat)
            .await
            .unwrap());
        assert!(!registry
            .supports_quote_updates(&url, &CurrencyUnit::Usd)
            .await
            .unwrap());
    }
}
