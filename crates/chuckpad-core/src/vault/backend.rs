//! Secure storage backends for the credential vault.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use keyring::Entry;

use super::VaultError;

/// Keychain service name all credential entries live under
pub const SERVICE_NAME: &str = "chuckpad-social";

/// Durable store for secret strings keyed by account name.
///
/// A `write` must replace the whole secret or fail; the vault relies on that
/// for per-environment atomicity.
pub trait SecretBackend: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored for `account`.
    fn read(&self, account: &str) -> Result<Option<String>, VaultError>;

    fn write(&self, account: &str, secret: &str) -> Result<(), VaultError>;

    /// Deleting a missing account succeeds.
    fn delete(&self, account: &str) -> Result<(), VaultError>;
}

// ============================================================================
// Keyring
// ============================================================================

/// Whether this build links a platform secure store. Without one, keyring
/// falls back to a mock store that forgets every entry as soon as it is written.
pub const NATIVE_STORE_AVAILABLE: bool = cfg!(all(
    feature = "native-keyring",
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "windows",
        target_os = "linux"
    )
));

/// OS keychain via the `keyring` crate.
///
/// When no platform store is compiled in, writes are rejected with
/// `VaultError::Unavailable` and reads report nothing stored.
pub struct KeyringBackend {
    service: String,
    native: bool,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            native: NATIVE_STORE_AVAILABLE,
        }
    }

    #[cfg(test)]
    fn without_native_store(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            native: false,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.native
    }

    fn entry(&self, account: &str) -> Result<Entry, VaultError> {
        Ok(Entry::new(&self.service, account)?)
    }
}

impl SecretBackend for KeyringBackend {
    fn read(&self, account: &str) -> Result<Option<String>, VaultError> {
        if !self.native {
            return Ok(None);
        }
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        if !self.native {
            return Err(VaultError::Unavailable(
                "no platform secure store in this build (enable the native-keyring feature)"
                    .to_string(),
            ));
        }
        self.entry(account)?.set_password(secret)?;
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        if !self.native {
            return Ok(());
        }
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local backend. Survives as long as the value does, so a second
/// vault built on the same instance behaves like a restarted process.
///
/// Reads and writes can be made to fail to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    secrets: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail (or succeed again).
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Raw stored secret, for inspecting what was persisted
    pub fn raw(&self, account: &str) -> Option<String> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned()
    }

    /// Overwrite a stored secret directly, bypassing the vault
    pub fn put_raw(&self, account: &str, secret: &str) {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.to_string(), secret.to_string());
    }
}

impl SecretBackend for MemoryBackend {
    fn read(&self, account: &str) -> Result<Option<String>, VaultError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable(format!("read of {} rejected", account)));
        }
        Ok(self.raw(account))
    }

    fn write(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable(format!("write of {} rejected", account)));
        }
        self.put_raw(account, secret);
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable(format!("delete of {} rejected", account)));
        }
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account);
        Ok(())
    }
}
