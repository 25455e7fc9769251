//! NUT-13: Deterministic Secrets
//!
//! <https://github.com/cashubtc/nuts/blob/main/13.md>

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::hashes::{hmac, sha256, Hash, HashEngine, HmacEngine};
use bitcoin::{secp256k1, Network};
use thiserror::Error;
use tracing::instrument;

use super::nut00::{BlindedMessage, PreMint, PreMintSecrets};
use super::nut01::SecretKey;
use super::nut02::{Id, KeySetVersion};
use crate::dhke::blind_message;
use crate::secret::Secret;
use crate::util::hex;
use crate::{Amount, SECP256K1};

/// NUT13 Error
#[derive(Debug, Error)]
pub enum Error {
    /// DHKE error
    #[error(transparent)]
    DHKE(#[from] crate::dhke::Error),
    /// NUT02 Error
    #[error(transparent)]
    NUT02(#[from] super::nut02::Error),
    /// Bip32 Error
    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
    /// SecretKey Error
    #[error(transparent)]
    SecpError(#[from] secp256k1::Error),
    /// Counter overflow
    #[error("Keyset counter overflow")]
    CounterOverflow,
}

const KDF_DOMAIN: &[u8] = b"Cashu_KDF_HMAC_SHA256";

fn hmac_derive(seed: &[u8; 64], keyset_id: Id, counter: u32, domain_byte: u8) -> [u8; 32] {
    let mut engine = HmacEngine::<sha256::Hash>::new(seed);
    engine.input(KDF_DOMAIN);
    engine.input(&keyset_id.to_bytes());
    engine.input(&u64::from(counter).to_be_bytes());
    engine.input(&[domain_byte]);
    hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

fn legacy_derive(
    seed: &[u8; 64],
    keyset_id: Id,
    counter: u32,
    leaf: u32,
) -> Result<secp256k1::SecretKey, Error> {
    let xpriv = Xpriv::new_master(Network::Bitcoin, seed)?;
    let path = derive_path_from_keyset_id(keyset_id)?
        .child(ChildNumber::from_hardened_idx(counter)?)
        .child(ChildNumber::from_normal_idx(leaf)?);
    Ok(xpriv.derive_priv(&SECP256K1, &path)?.private_key)
}

impl Secret {
    /// Create new [`Secret`] from seed
    pub fn from_seed(seed: &[u8; 64], keyset_id: Id, counter: u32) -> Result<Self, Error> {
        let bytes = match keyset_id.get_version() {
            KeySetVersion::Version00 => legacy_derive(seed, keyset_id, counter, 0)?.secret_bytes(),
            KeySetVersion::Version01 => hmac_derive(seed, keyset_id, counter, 0x00),
        };
        Ok(Self::new(hex::encode(bytes)))
    }
}

impl SecretKey {
    /// Create new blinding factor [`SecretKey`] from seed
    pub fn from_seed(seed: &[u8; 64], keyset_id: Id, counter: u32) -> Result<Self, Error> {
        match keyset_id.get_version() {
            KeySetVersion::Version00 => Ok(legacy_derive(seed, keyset_id, counter, 1)?.into()),
            KeySetVersion::Version01 => Ok(Self::from(secp256k1::SecretKey::from_slice(
                &hmac_derive(seed, keyset_id, counter, 0x01),
            )?)),
        }
    }
}

impl PreMintSecrets {
    fn derive_one(
        seed: &[u8; 64],
        keyset_id: Id,
        counter: u32,
        amount: Amount,
    ) -> Result<PreMint, Error> {
        let secret = Secret::from_seed(seed, keyset_id, counter)?;
        let blinding_factor = SecretKey::from_seed(seed, keyset_id, counter)?;

        let (blinded, r) = blind_message(secret.as_bytes(), Some(blinding_factor))?;

        Ok(PreMint {
            blinded_message: BlindedMessage::new(amount, keyset_id, blinded),
            secret,
            r,
            amount,
        })
    }

    /// Deterministic outputs for `amount`, split into powers of two
    ///
    /// Output `i` uses counter `counter + i`.
    #[instrument(skip(seed))]
    pub fn from_seed(
        keyset_id: Id,
        counter: u32,
        seed: &[u8; 64],
        amount: Amount,
    ) -> Result<Self, Error> {
        Self::from_seed_with_amounts(keyset_id, counter, seed, &amount.split())
    }

    /// Deterministic outputs for an explicit list of output amounts
    pub fn from_seed_with_amounts(
        keyset_id: Id,
        counter: u32,
        seed: &[u8; 64],
        amounts: &[Amount],
    ) -> Result<Self, Error> {
        let mut pre_mint_secrets = PreMintSecrets::new(keyset_id);

        for (offset, amount) in amounts.iter().enumerate() {
            let offset = u32::try_from(offset).map_err(|_| Error::CounterOverflow)?;
            let counter = counter.checked_add(offset).ok_or(Error::CounterOverflow)?;
            pre_mint_secrets
                .secrets
                .push(Self::derive_one(seed, keyset_id, counter, *amount)?);
        }

        Ok(pre_mint_secrets)
    }

    /// Outputs for counters `start_count..=end_count` with unknown amounts, used for restore
    pub fn restore_batch(
        keyset_id: Id,
        seed: &[u8; 64],
        start_count: u32,
        end_count: u32,
    ) -> Result<Self, Error> {
        let mut pre_mint_secrets = PreMintSecrets::new(keyset_id);

        for counter in start_count..=end_count {
            pre_mint_secrets
                .secrets
                .push(Self::derive_one(seed, keyset_id, counter, Amount::ZERO)?);
        }

        Ok(pre_mint_secrets)
    }
}

fn derive_path_from_keyset_id(id: Id) -> Result<DerivationPath, Error> {
    let index = id.to_derivation_index()?;

    Ok(DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(129372)?,
        ChildNumber::from_hardened_idx(0)?,
        ChildNumber::from_hardened_idx(index)?,
    ]))
}
