//! Vault: in-memory key material unlocked by user passphrase.
//!
//! The vault holds the 32-byte database encryption key in memory. When the
//! caller locks the store (or auto-lock fires), the key is dropped and
//! zeroized. All access runs through `with_key`, which also enforces the
//! auto-lock timeout and resets it on use.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use zeroize::ZeroizeOnDrop;

use crate::error::StoreError;
use dl_crypto::kdf::{derive_key_argon2id, generate_salt};

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
    #[zeroize(skip)]
    last_activity: Instant,
    #[zeroize(skip)]
    auto_lock_secs: u64,
}

/// Thread-safe vault handle. Clone to share across threads.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(None)) }
    }

    /// Unlock the vault by deriving the key from a passphrase and salt.
    pub fn unlock(&self, passphrase: &[u8], salt: &[u8; 16]) -> Result<(), StoreError> {
        let key = derive_key_argon2id(passphrase, salt)?;
        let mut guard = self.inner.write();
        *guard = Some(VaultInner {
            key: key.0,
            last_activity: Instant::now(),
            auto_lock_secs: 1800,
        });
        Ok(())
    }

    /// Unlock with an already-derived key (e.g. recovered from a backup).
    pub fn unlock_with_key(&self, key: [u8; 32]) {
        let mut guard = self.inner.write();
        *guard = Some(VaultInner {
            key,
            last_activity: Instant::now(),
            auto_lock_secs: 1800,
        });
    }

    /// Lock the vault — zeroizes the key.
    pub fn lock(&self) {
        let mut guard = self.inner.write();
        *guard = None;
    }

    pub fn is_locked(&self) -> bool {
        let expired = {
            let guard = self.inner.read();
            match guard.as_ref() {
                Some(inner) if inner.auto_lock_secs > 0 => {
                    inner.last_activity.elapsed() > Duration::from_secs(inner.auto_lock_secs)
                }
                Some(_) => false,
                None => return true,
            }
        };
        if expired {
            self.lock();
        }
        expired
    }

    /// Set the auto-lock timeout in seconds. 0 disables auto-lock.
    pub fn set_auto_lock_timeout(&self, seconds: u64) {
        let mut guard = self.inner.write();
        if let Some(inner) = guard.as_mut() {
            inner.auto_lock_secs = seconds;
        }
    }

    /// Reset the auto-lock timer.
    pub fn touch(&self) {
        let mut guard = self.inner.write();
        if let Some(inner) = guard.as_mut() {
            inner.last_activity = Instant::now();
        }
    }

    /// Run `f` with the vault key, touching the activity timer first.
    /// Returns `StoreError::VaultLocked` if the vault is locked or the
    /// auto-lock timeout has expired.
    pub fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        if self.is_locked() {
            return Err(StoreError::VaultLocked);
        }
        let mut guard = self.inner.write();
        match guard.as_mut() {
            Some(inner) => {
                inner.last_activity = Instant::now();
                f(&inner.key)
            }
            None => Err(StoreError::VaultLocked),
        }
    }

    /// Seconds remaining until auto-lock, or `None` if locked.
    pub fn time_until_lock(&self) -> Option<u64> {
        let guard = self.inner.read();
        guard.as_ref().map(|inner| {
            if inner.auto_lock_secs == 0 {
                return u64::MAX;
            }
            let elapsed = inner.last_activity.elapsed().as_secs();
            inner.auto_lock_secs.saturating_sub(elapsed)
        })
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a fresh salt for a new account. Not secret; store alongside the
/// encrypted database.
pub fn new_vault_salt() -> [u8; 16] {
    generate_salt()
}
