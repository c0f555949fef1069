use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::{KeyringBackend, SecretBackend};
use super::VaultError;
use crate::environment::Environment;

/// Identity and session data for one environment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Permanent identifier, never changes once assigned
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub auth_token: Option<String>,
}

impl CredentialRecord {
    pub fn new(user_id: i64, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            email: email.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

// Token and email stay out of logs
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("email", &"<redacted>")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Persisted layout: one flat JSON object per environment.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    environment: Environment,
    #[serde(flatten)]
    record: CredentialRecord,
}

/// Storage account name for an environment's credential entry
pub fn account_name(environment: Environment) -> String {
    format!("credential:{}", environment.name())
}

/// Per-environment credential storage.
///
/// Each environment has at most one record, stored as a single secure entry so
/// all of its fields change together. Records are mirrored in memory after
/// their first read; the mirror is updated only once the backend has accepted
/// a write, so it never runs ahead of what is durable.
pub struct CredentialVault {
    backend: Arc<dyn SecretBackend>,
    // Missing key = not loaded yet, Some(None) = known absent
    records: Mutex<HashMap<Environment, Option<CredentialRecord>>>,
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new(Arc::new(KeyringBackend::default()))
    }
}

impl CredentialVault {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Environment, Option<CredentialRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_locked(
        &self,
        records: &mut HashMap<Environment, Option<CredentialRecord>>,
        environment: Environment,
    ) -> Result<Option<CredentialRecord>, VaultError> {
        if let Some(cached) = records.get(&environment) {
            return Ok(cached.clone());
        }

        let loaded = match self.backend.read(&account_name(environment))? {
            Some(json) => Some(Self::decode(environment, &json)?),
            None => None,
        };
        debug!(environment = %environment, found = loaded.is_some(), "Loaded credential");
        records.insert(environment, loaded.clone());
        Ok(loaded)
    }

    fn decode(environment: Environment, json: &str) -> Result<CredentialRecord, VaultError> {
        let stored: StoredCredential =
            serde_json::from_str(json).map_err(|e| VaultError::Corrupt {
                environment,
                reason: e.to_string(),
            })?;
        if stored.environment != environment {
            return Err(VaultError::Corrupt {
                environment,
                reason: format!("entry belongs to {}", stored.environment),
            });
        }
        Ok(stored.record)
    }

    fn persist_locked(
        &self,
        records: &mut HashMap<Environment, Option<CredentialRecord>>,
        environment: Environment,
        record: CredentialRecord,
    ) -> Result<(), VaultError> {
        let stored = StoredCredential {
            environment,
            record,
        };
        let json = serde_json::to_string(&stored)?;
        self.backend.write(&account_name(environment), &json)?;
        records.insert(environment, Some(stored.record));
        Ok(())
    }

    /// Credential for `environment`, surfacing backend errors.
    pub fn load(&self, environment: Environment) -> Result<Option<CredentialRecord>, VaultError> {
        let mut records = self.lock();
        self.load_locked(&mut records, environment)
    }

    /// Credential for `environment`, or `None` if absent.
    ///
    /// An unreadable backend is reported as absent (and logged); the next call
    /// tries the backend again.
    pub fn get(&self, environment: Environment) -> Option<CredentialRecord> {
        match self.load(environment) {
            Ok(record) => record,
            Err(e) => {
                warn!(environment = %environment, error = %e, "Failed to read credential");
                None
            }
        }
    }

    pub fn is_logged_in(&self, environment: Environment) -> bool {
        self.get(environment).is_some()
    }

    /// Persist `record` as the only credential for `environment`.
    ///
    /// On error nothing changes, in memory or in the backend.
    pub fn store(&self, environment: Environment, record: CredentialRecord) -> Result<(), VaultError> {
        let mut records = self.lock();
        let user_id = record.user_id;
        self.persist_locked(&mut records, environment, record)?;
        info!(environment = %environment, user_id, "Stored credential");
        Ok(())
    }

    /// Apply `change` to the stored record for `environment` and persist the
    /// result as one write. The user id cannot be changed this way.
    pub fn update<F>(&self, environment: Environment, change: F) -> Result<CredentialRecord, VaultError>
    where
        F: FnOnce(&mut CredentialRecord),
    {
        let mut records = self.lock();
        let current = self
            .load_locked(&mut records, environment)?
            .ok_or(VaultError::NotLoggedIn(environment))?;

        let mut updated = current.clone();
        change(&mut updated);
        if updated.user_id != current.user_id {
            return Err(VaultError::UserIdChanged {
                stored: current.user_id,
                attempted: updated.user_id,
            });
        }

        self.persist_locked(&mut records, environment, updated.clone())?;
        debug!(environment = %environment, "Updated credential");
        Ok(updated)
    }

    /// Remove the credential for `environment` only. No-op if none is stored.
    pub fn clear(&self, environment: Environment) -> Result<(), VaultError> {
        let mut records = self.lock();
        self.backend.delete(&account_name(environment))?;
        records.insert(environment, None);
        info!(environment = %environment, "Cleared credential");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
