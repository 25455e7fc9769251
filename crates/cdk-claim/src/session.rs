//! Session scoped secrets
//!
//! The wallet seed, the key tree that NUT-20 locking keys come from, and the
//! P2PK keys used to unlock inbound tokens live here for the duration of a
//! login. [`SessionContext::teardown`] drops them, erasing the seed, the
//! master key and every P2PK key, after which every access fails with
//! [`Error::SessionClosed`].

use std::fmt;
use std::sync::Arc;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::rand::{self, Rng};
use bitcoin::Network;
use cdk_claim_common::{PublicKey, SecretKey, SECP256K1};
use parking_lot::RwLock;
use zeroize::{Zeroize, Zeroizing};

use crate::Error;

/// Purpose of the locking key tree
const LOCKING_KEY_PURPOSE: u32 = 129372;
/// Branch of NUT-20 quote locking keys
const LOCKING_KEY_BRANCH: u32 = 2;

struct SessionSecrets {
    user_id: String,
    seed: Zeroizing<[u8; 64]>,
    xpriv: Xpriv,
    p2pk_keys: Vec<SecretKey>,
}

impl SessionSecrets {
    fn wipe(&mut self) {
        self.seed.zeroize();
        self.xpriv.private_key.non_secure_erase();
        // SecretKey erases itself on drop
        self.p2pk_keys.clear();
    }
}

impl Drop for SessionSecrets {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// Secrets of a logged in user
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<SessionSecrets>>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SessionContext")
            .field("user_id", &inner.as_ref().map(|s| s.user_id.clone()))
            .field("closed", &inner.is_none())
            .finish()
    }
}

impl SessionContext {
    /// Create new [`SessionContext`] from a 64 byte seed
    pub fn new(user_id: impl Into<String>, seed: [u8; 64]) -> Result<Self, Error> {
        let seed = Zeroizing::new(seed);
        let xpriv = Xpriv::new_master(Network::Bitcoin, seed.as_ref())?;

        Ok(Self {
            inner: Arc::new(RwLock::new(Some(SessionSecrets {
                user_id: user_id.into(),
                seed,
                xpriv,
                p2pk_keys: Vec::new(),
            }))),
        })
    }

    /// Create new [`SessionContext`] from a BIP-39 mnemonic
    pub fn from_mnemonic(
        user_id: impl Into<String>,
        mnemonic: &Mnemonic,
        passphrase: &str,
    ) -> Result<Self, Error> {
        Self::new(user_id, mnemonic.to_seed_normalized(passphrase))
    }

    fn read<T>(&self, f: impl FnOnce(&SessionSecrets) -> T) -> Result<T, Error> {
        self.inner.read().as_ref().map(f).ok_or(Error::SessionClosed)
    }

    /// User the session belongs to
    pub fn user_id(&self) -> Result<String, Error> {
        self.read(|s| s.user_id.clone())
    }

    /// Run `f` with the wallet seed
    ///
    /// The seed never leaves the session, callers derive what they need inside `f`.
    pub fn with_seed<T>(&self, f: impl FnOnce(&[u8; 64]) -> T) -> Result<T, Error> {
        self.read(|s| f(&s.seed))
    }

    /// Fresh derivation path for a quote locking key
    pub fn new_locking_path(&self) -> Result<DerivationPath, Error> {
        let index: u32 = rand::thread_rng().gen_range(0..(1 << 31));
        Ok(DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(LOCKING_KEY_PURPOSE)?,
            ChildNumber::from_hardened_idx(0)?,
            ChildNumber::from_hardened_idx(LOCKING_KEY_BRANCH)?,
            ChildNumber::from_hardened_idx(index)?,
        ]))
    }

    /// Locking key at `path`
    pub fn derive_locking_key(&self, path: &DerivationPath) -> Result<SecretKey, Error> {
        let mut derived = self.read(|s| s.xpriv.derive_priv(&SECP256K1, path))??;
        let key = SecretKey::from(derived.private_key);
        derived.private_key.non_secure_erase();
        Ok(key)
    }

    /// Register a key inbound P2PK tokens may be locked to
    pub fn add_p2pk_key(&self, secret_key: SecretKey) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let secrets = inner.as_mut().ok_or(Error::SessionClosed)?;
        if !secrets.p2pk_keys.contains(&secret_key) {
            secrets.p2pk_keys.push(secret_key);
        }
        Ok(())
    }

    /// Public keys the session can sign for
    pub fn p2pk_pubkeys(&self) -> Result<Vec<PublicKey>, Error> {
        self.read(|s| s.p2pk_keys.iter().map(SecretKey::public_key).collect())
    }

    /// Signing key for a P2PK locking key
    pub fn p2pk_key(&self, pubkey: &PublicKey) -> Result<Option<SecretKey>, Error> {
        self.read(|s| {
            s.p2pk_keys
                .iter()
                .find(|k| &k.public_key() == pubkey)
                .cloned()
        })
    }

    /// Wipe the session secrets
    pub fn teardown(&self) {
        if let Some(secrets) = self.inner.write().take() {
            tracing::info!("Session of user {} closed", secrets.user_id);
        }
    }

    /// Has the session been torn down
    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    const MNEMONIC: &str =
        "half depart obvious quality work element tank gorilla view sugar picture humble";

    fn session() -> SessionContext {
        let mnemonic = Mnemonic::from_str(MNEMONIC).expect("valid mnemonic");
        SessionContext::from_mnemonic("user-1", &mnemonic, "").expect("session")
    }

    #[test]
    fn test_locking_keys_deterministic() {
        let session = session();
        let path = session.new_locking_path().expect("path");
        assert_eq!(path.len(), 4);

        let first = session.derive_locking_key(&path).expect("key");
        let second = session.derive_locking_key(&path).expect("key");
        assert_eq!(first.public_key(), second.public_key());

        let other = session.new_locking_path().expect("path");
        if other != path {
            assert_ne!(
                session.derive_locking_key(&other).expect("key").public_key(),
                first.public_key()
            );
        }
    }

    #[test]
    fn test_teardown_wipes_secrets() {
        let session = session();
        session.add_p2pk_key(SecretKey::generate()).expect("add");
        assert_eq!(session.p2pk_pubkeys().expect("keys").len(), 1);

        let clone = session.clone();
        session.teardown();

        assert!(clone.is_closed());
        assert!(matches!(clone.user_id(), Err(Error::SessionClosed)));
        assert!(matches!(clone.with_seed(|_| ()), Err(Error::SessionClosed)));
        assert!(matches!(
            clone.add_p2pk_key(SecretKey::generate()),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_wipe_erases_key_material() {
        let mut secrets = SessionSecrets {
            user_id: "user-1".to_string(),
            seed: Zeroizing::new([7; 64]),
            xpriv: Xpriv::new_master(Network::Bitcoin, &[7; 64]).expect("master"),
            p2pk_keys: vec![SecretKey::generate()],
        };
        let master = secrets.xpriv.private_key.secret_bytes();

        secrets.wipe();

        assert_eq!(*secrets.seed, [0; 64]);
        assert_ne!(secrets.xpriv.private_key.secret_bytes(), master);
        assert!(secrets.p2pk_keys.is_empty());
    }

    #[test]
    fn test_p2pk_key_lookup() {
        let session = session();
        let key = SecretKey::generate();
        session.add_p2pk_key(key.clone()).expect("add");
        session.add_p2pk_key(key.clone()).expect("add twice");

        assert_eq!(session.p2pk_pubkeys().expect("keys"), vec![key.public_key()]);
        assert!(session
            .p2pk_key(&key.public_key())
            .expect("lookup")
            .is_some());
        assert!(session
            .p2pk_key(&SecretKey::generate().public_key())
            .expect("lookup")
            .is_none());
    }
}
