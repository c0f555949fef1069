//! Credential storage scoped per backend environment.
//!
//! This module provides:
//! - `CredentialVault`: one credential record per environment, persisted in secure storage
//! - `SecretBackend`: the storage seam, with `KeyringBackend` (OS keychain) and
//!   `MemoryBackend` (process-local, supports failure injection)
//!
//! Each environment's record is written as a single entry under the account
//! `credential:<environment>`, so a developer can stay logged into different
//! users on production, stage and local at the same time.

pub mod backend;
pub mod credentials;
pub mod error;

pub use backend::{KeyringBackend, MemoryBackend, SecretBackend, NATIVE_STORE_AVAILABLE};
pub use credentials::{account_name, CredentialRecord, CredentialVault};
pub use error::VaultError;
