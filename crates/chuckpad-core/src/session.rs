//! Session state shared by the transport and live-session layers.
//!
//! `Session` is the process-wide context: it owns the environment selection,
//! the credential vault and the response cache, and answers the questions the
//! request layer asks before and after each call ("which base URL", "which
//! token", "is this response cached").

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::environment::{Environment, EnvironmentManager};
use crate::models::PatchType;
use crate::vault::{CredentialRecord, CredentialVault, KeyringBackend, SecretBackend, VaultError};

/// Buffer size for the session event channel.
/// Events are rare (login, logout, environment switch); 16 leaves plenty of slack for slow listeners.
const EVENT_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutKind {
    /// Only local credentials are removed; the token stays valid on the server
    Local,
    /// The server already invalidated the token; local credentials follow
    Remote,
}

/// Where a freshly logged-in credential ended up.
#[derive(Debug)]
pub enum LoginPersistence {
    Durable,
    /// Secure storage rejected the write. The user is logged in until the
    /// process exits and will need to log in again next launch.
    ///
    /// `previous_cleared` is false when the record of whoever was logged in
    /// before could not be removed either, so a restart would bring it back.
    MemoryOnly {
        error: VaultError,
        previous_cleared: bool,
    },
}

impl LoginPersistence {
    pub fn is_durable(&self) -> bool {
        matches!(self, LoginPersistence::Durable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn {
        environment: Environment,
        user_id: i64,
    },
    LoggedOut {
        environment: Environment,
        kind: LogoutKind,
    },
    EnvironmentChanged {
        from: Environment,
        to: Environment,
    },
}

/// Everything a request needs, captured once when it starts. Switching
/// environments afterwards does not affect a request holding a context.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub environment: Environment,
    pub base_url: &'static str,
    pub auth_token: Option<String>,
    pub patch_type: PatchType,
}

impl RequestContext {
    /// Full URL for `path` against this context's environment
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("patch_type", &self.patch_type)
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    environments: EnvironmentManager,
    vault: CredentialVault,
    cache: CacheStore,
    patch_type: PatchType,
    // Logins whose durable write failed, kept for this process only
    memory_only: Mutex<HashMap<Environment, CredentialRecord>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(
        environments: EnvironmentManager,
        vault: CredentialVault,
        cache: CacheStore,
        patch_type: PatchType,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            environments,
            vault,
            cache,
            patch_type,
            memory_only: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Session backed by the OS keychain and the system clock.
    pub fn from_config(config: &Config) -> Self {
        Self::with_backend(config, Arc::new(KeyringBackend::default()), Arc::new(SystemClock))
    }

    pub fn with_backend(
        config: &Config,
        backend: Arc<dyn SecretBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            EnvironmentManager::new(config.environment),
            CredentialVault::new(backend),
            CacheStore::with_config(clock, config.cache_config()),
            config.patch_type,
        )
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub fn patch_type(&self) -> PatchType {
        self.patch_type
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }

    fn memory_only(&self) -> MutexGuard<'_, HashMap<Environment, CredentialRecord>> {
        self.memory_only.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Environment =====

    pub fn environment(&self) -> Environment {
        self.environments.active()
    }

    pub fn base_url(&self) -> &'static str {
        self.environments.base_url()
    }

    pub fn is_local_environment(&self) -> bool {
        self.environments.is_local_environment()
    }

    /// Switch environments. Credentials and cached responses of every
    /// environment are left as they are.
    pub fn set_environment(&self, environment: Environment) {
        let previous = self.environments.set_environment(environment);
        if previous != environment {
            self.emit(SessionEvent::EnvironmentChanged {
                from: previous,
                to: environment,
            });
        }
    }

    pub fn toggle_environment(&self) -> Environment {
        let (previous, next) = self.environments.toggle_environment();
        self.emit(SessionEvent::EnvironmentChanged {
            from: previous,
            to: next,
        });
        next
    }

    // ===== Credentials =====

    /// Credential the session uses for `environment`, including a login that
    /// only lives in memory.
    pub fn credential(&self, environment: Environment) -> Option<CredentialRecord> {
        let overlay = self.memory_only();
        match overlay.get(&environment) {
            Some(record) => Some(record.clone()),
            None => self.vault.get(environment),
        }
    }

    /// Credential of the active environment.
    pub fn active_credential(&self) -> Option<CredentialRecord> {
        self.credential(self.environment())
    }

    pub fn is_logged_in(&self) -> bool {
        self.active_credential().is_some()
    }

    pub fn logged_in_user_id(&self) -> Option<i64> {
        self.active_credential().map(|r| r.user_id)
    }

    pub fn logged_in_username(&self) -> Option<String> {
        self.active_credential().map(|r| r.username)
    }

    pub fn logged_in_email(&self) -> Option<String> {
        self.active_credential().map(|r| r.email)
    }

    /// Snapshot of environment, base URL and token for a request about to start.
    pub fn request_context(&self) -> RequestContext {
        let (environment, base_url) = self.environments.snapshot();
        RequestContext {
            environment,
            base_url,
            auth_token: self.credential(environment).and_then(|r| r.auth_token),
            patch_type: self.patch_type,
        }
    }

    /// Record a successful login or registration for the active environment
    /// and drop every cached response.
    ///
    /// A secure-storage failure does not fail the login: the credential is
    /// kept in memory for the rest of the process, the previously stored
    /// record for the environment is removed, and the error is returned
    /// inside `LoginPersistence::MemoryOnly`.
    pub fn on_login_succeeded(&self, record: CredentialRecord) -> LoginPersistence {
        let environment = self.environment();
        let user_id = record.user_id;

        let mut overlay = self.memory_only();
        let persistence = match self.vault.store(environment, record.clone()) {
            Ok(()) => {
                overlay.remove(&environment);
                LoginPersistence::Durable
            }
            Err(error) => {
                warn!(
                    environment = %environment,
                    error = %error,
                    "Failed to persist credential, session will not survive restart"
                );
                // The stored record belongs to the previous user
                let previous_cleared = match self.vault.clear(environment) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            environment = %environment,
                            error = %e,
                            "Failed to remove previous credential, it will return after restart"
                        );
                        false
                    }
                };
                overlay.insert(environment, record);
                LoginPersistence::MemoryOnly {
                    error,
                    previous_cleared,
                }
            }
        };
        drop(overlay);

        self.cache.clear();
        info!(environment = %environment, user_id, durable = persistence.is_durable(), "Logged in");
        self.emit(SessionEvent::LoggedIn {
            environment,
            user_id,
        });
        persistence
    }

    /// Forget the active environment's credential and drop every cached response.
    ///
    /// The cache is cleared even when secure storage fails; in that case the
    /// session keeps the credential it had and the error is returned.
    pub fn on_logout(&self, kind: LogoutKind) -> Result<(), VaultError> {
        let environment = self.environment();
        let mut overlay = self.memory_only();
        let result = self.vault.clear(environment);
        if result.is_ok() {
            overlay.remove(&environment);
        }
        drop(overlay);
        self.cache.clear();

        match &result {
            Ok(()) => {
                info!(environment = %environment, ?kind, "Logged out");
                self.emit(SessionEvent::LoggedOut { environment, kind });
            }
            Err(e) => {
                warn!(environment = %environment, error = %e, "Failed to clear stored credential");
            }
        }
        result
    }

    /// Change the active user's username and/or email. `None` leaves a field as is.
    pub fn on_profile_updated(
        &self,
        username: Option<String>,
        email: Option<String>,
    ) -> Result<CredentialRecord, VaultError> {
        let environment = self.environment();
        let apply = |record: &mut CredentialRecord| {
            if let Some(username) = username {
                record.username = username;
            }
            if let Some(email) = email {
                record.email = email;
            }
        };

        let mut overlay = self.memory_only();
        if let Some(record) = overlay.get_mut(&environment) {
            apply(record);
            return Ok(record.clone());
        }
        self.vault.update(environment, apply)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::vault::MemoryBackend;
    use chrono::Duration;

    struct Fixture {
        session: Session,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::starting_now());
        let config = Config {
            patch_type: PatchType::MiniAudicle,
            ..Config::default()
        };
        let session = Session::with_backend(&config, backend.clone(), clock.clone());
        Fixture {
            session,
            backend,
            clock,
        }
    }

    fn ada() -> CredentialRecord {
        CredentialRecord::new(7, "ada", "ada@example.com").with_auth_token("tok-1")
    }

    fn grace() -> CredentialRecord {
        CredentialRecord::new(9, "grace", "grace@example.com").with_auth_token("tok-2")
    }

    #[test]
    fn test_login_stores_record_and_clears_cache() {
        let f = fixture();
        f.session.cache().set("patches:recent", vec![1, 2, 3]);

        let persistence = f.session.on_login_succeeded(ada());
        assert!(persistence.is_durable());
        assert_eq!(f.session.vault().get(Environment::Production), Some(ada()));
        assert!(f.session.cache().is_empty());
    }

    #[test]
    fn test_environment_switch_keeps_cache() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        f.session
            .cache()
            .set_with_ttl("patches:mine", vec!["drone".to_string()], Duration::seconds(60));

        f.session.set_environment(Environment::Stage);
        f.session.set_environment(Environment::Production);
        f.clock.advance(Duration::seconds(30));

        assert_eq!(
            f.session.cache().get::<Vec<String>>("patches:mine"),
            Some(vec!["drone".to_string()])
        );
    }

    #[test]
    fn test_logged_in_state_follows_active_environment() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        assert!(f.session.is_logged_in());

        f.session.set_environment(Environment::Stage);
        assert!(!f.session.is_logged_in());

        f.session.on_login_succeeded(grace());
        assert_eq!(f.session.logged_in_username().as_deref(), Some("grace"));

        f.session.set_environment(Environment::Production);
        assert_eq!(f.session.logged_in_user_id(), Some(7));
        assert_eq!(f.session.logged_in_email().as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_logout_only_clears_active_environment() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        f.session.set_environment(Environment::Local);
        f.session.on_login_succeeded(grace());
        f.session.cache().set("k", 1);

        f.session.on_logout(LogoutKind::Local).expect("logout");
        assert!(!f.session.is_logged_in());
        assert!(f.session.cache().is_empty());
        assert_eq!(f.session.vault().get(Environment::Production), Some(ada()));
    }

    #[test]
    fn test_login_persistence_failure_keeps_session_in_memory() {
        let f = fixture();
        f.backend.set_fail_writes(true);

        let persistence = f.session.on_login_succeeded(ada());
        assert!(matches!(
            persistence,
            LoginPersistence::MemoryOnly {
                error: VaultError::Unavailable(_),
                previous_cleared: true,
            }
        ));
        assert!(f.session.is_logged_in());
        assert_eq!(
            f.session.request_context().auth_token.as_deref(),
            Some("tok-1")
        );

        // Durable view never saw the login: a restart means logging in again
        assert_eq!(f.session.vault().get(Environment::Production), None);
        let restarted = Session::with_backend(&Config::default(), f.backend.clone(), f.clock.clone());
        assert!(!restarted.is_logged_in());
    }

    #[test]
    fn test_later_durable_login_replaces_memory_only_record() {
        let f = fixture();
        f.backend.set_fail_writes(true);
        f.session.on_login_succeeded(ada());

        f.backend.set_fail_writes(false);
        assert!(f.session.on_login_succeeded(grace()).is_durable());
        assert_eq!(f.session.active_credential(), Some(grace()));
        assert_eq!(f.session.vault().get(Environment::Production), Some(grace()));
    }

    #[test]
    fn test_logout_clears_memory_only_record() {
        let f = fixture();
        f.backend.set_fail_writes(true);
        f.session.on_login_succeeded(ada());
        f.backend.set_fail_writes(false);

        f.session.on_logout(LogoutKind::Remote).expect("logout");
        assert!(!f.session.is_logged_in());
    }

    #[test]
    fn test_memory_only_login_removes_previous_stored_user() {
        let f = fixture();
        assert!(f.session.on_login_succeeded(ada()).is_durable());

        f.backend.set_fail_writes(true);
        let persistence = f.session.on_login_succeeded(grace());
        assert!(matches!(
            persistence,
            LoginPersistence::MemoryOnly {
                previous_cleared: true,
                ..
            }
        ));
        assert_eq!(f.session.active_credential(), Some(grace()));
        assert!(f.backend.raw("credential:production").is_none());

        // Next launch starts logged out instead of as ada
        let restarted = Session::with_backend(&Config::default(), f.backend.clone(), f.clock.clone());
        assert!(!restarted.is_logged_in());
    }

    #[test]
    fn test_memory_only_login_reports_previous_user_left_behind() {
        let f = fixture();
        f.session.on_login_succeeded(ada());

        f.backend.set_fail_writes(true);
        f.backend.set_fail_deletes(true);
        let persistence = f.session.on_login_succeeded(grace());
        assert!(matches!(
            persistence,
            LoginPersistence::MemoryOnly {
                previous_cleared: false,
                ..
            }
        ));
        assert_eq!(f.session.active_credential(), Some(grace()));
        assert_eq!(f.session.request_context().auth_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn test_failed_logout_keeps_memory_only_user() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        f.backend.set_fail_writes(true);
        f.backend.set_fail_deletes(true);
        f.session.on_login_succeeded(grace());

        assert!(f.session.on_logout(LogoutKind::Local).is_err());
        assert_eq!(f.session.active_credential(), Some(grace()));

        f.backend.set_fail_deletes(false);
        f.session.on_logout(LogoutKind::Local).expect("logout");
        assert!(!f.session.is_logged_in());
        assert!(f.backend.raw("credential:production").is_none());
    }

    #[test]
    fn test_credential_includes_memory_only_records_per_environment() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        f.session.set_environment(Environment::Stage);
        f.backend.set_fail_writes(true);
        f.session.on_login_succeeded(grace());
        f.session.set_environment(Environment::Production);

        assert_eq!(f.session.credential(Environment::Production), Some(ada()));
        assert_eq!(f.session.credential(Environment::Stage), Some(grace()));
        assert_eq!(f.session.vault().get(Environment::Stage), None);
        assert_eq!(f.session.credential(Environment::Local), None);
    }

    #[test]
    fn test_failed_logout_clears_cache_and_reports_error() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        f.session.cache().set("k", 1);
        f.backend.set_fail_deletes(true);

        assert!(f.session.on_logout(LogoutKind::Local).is_err());
        assert!(f.session.cache().is_empty());
        assert!(f.session.is_logged_in());
    }

    #[test]
    fn test_request_context_is_a_snapshot() {
        let f = fixture();
        f.session.on_login_succeeded(ada());
        let context = f.session.request_context();

        f.session.toggle_environment();
        assert_eq!(context.environment, Environment::Production);
        assert_eq!(context.base_url, "https://chuckpad-social.herokuapp.com");
        assert_eq!(context.auth_token.as_deref(), Some("tok-1"));
        assert_eq!(context.patch_type, PatchType::MiniAudicle);

        let after = f.session.request_context();
        assert_eq!(after.environment, Environment::Stage);
        assert_eq!(after.auth_token, None);
    }

    #[test]
    fn test_request_context_url_and_debug() {
        let f = fixture();
        f.session.set_environment(Environment::Local);
        f.session.on_login_succeeded(ada());
        let context = f.session.request_context();

        assert_eq!(context.url("/patch/my"), "http://localhost:9292/patch/my");
        assert_eq!(context.url("patch/my"), "http://localhost:9292/patch/my");
        assert!(!format!("{:?}", context).contains("tok-1"));
    }

    #[test]
    fn test_toggle_three_times_returns_to_start() {
        let f = fixture();
        assert_eq!(f.session.toggle_environment(), Environment::Stage);
        assert_eq!(f.session.toggle_environment(), Environment::Local);
        assert!(f.session.is_local_environment());
        assert_eq!(f.session.toggle_environment(), Environment::Production);
        assert_eq!(f.session.base_url(), "https://chuckpad-social.herokuapp.com");
    }

    #[test]
    fn test_profile_update_persists() {
        let f = fixture();
        f.session.on_login_succeeded(ada());

        let updated = f
            .session
            .on_profile_updated(None, Some("ada@lovelace.dev".to_string()))
            .expect("update");
        assert_eq!(updated.username, "ada");
        assert_eq!(updated.email, "ada@lovelace.dev");
        assert_eq!(
            f.session.vault().get(Environment::Production).map(|r| r.email),
            Some("ada@lovelace.dev".to_string())
        );
    }

    #[test]
    fn test_profile_update_applies_to_memory_only_record() {
        let f = fixture();
        f.backend.set_fail_writes(true);
        f.session.on_login_succeeded(ada());

        let updated = f
            .session
            .on_profile_updated(Some("ada.l".to_string()), None)
            .expect("update");
        assert_eq!(updated.username, "ada.l");
        assert_eq!(f.session.logged_in_username().as_deref(), Some("ada.l"));
    }

    #[test]
    fn test_profile_update_requires_login() {
        let f = fixture();
        assert!(matches!(
            f.session.on_profile_updated(Some("x".to_string()), None),
            Err(VaultError::NotLoggedIn(Environment::Production))
        ));
    }

    #[test]
    fn test_events_are_broadcast() {
        let f = fixture();
        let mut events = f.session.subscribe();

        f.session.on_login_succeeded(ada());
        f.session.set_environment(Environment::Stage);
        f.session.set_environment(Environment::Stage); // No change, no event
        f.session.toggle_environment();
        f.session.on_logout(LogoutKind::Local).expect("logout");

        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::LoggedIn {
                environment: Environment::Production,
                user_id: 7
            }
        );
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::EnvironmentChanged {
                from: Environment::Production,
                to: Environment::Stage
            }
        );
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::EnvironmentChanged {
                from: Environment::Stage,
                to: Environment::Local
            }
        );
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::LoggedOut {
                environment: Environment::Local,
                kind: LogoutKind::Local
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_and_environment_switches() {
        let f = fixture();
        let session = Arc::new(f.session);
        let mut handles = Vec::new();

        for task in 0..4i64 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    let context = session.request_context();
                    assert_eq!(context.base_url, context.environment.base_url());
                    // A token, when present, always belongs to the environment it was read for
                    if let Some(token) = &context.auth_token {
                        assert!(token.starts_with(context.environment.name()));
                    }
                    if i % 10 == 0 {
                        session.toggle_environment();
                    }
                    let env = session.environment();
                    session
                        .vault()
                        .store(
                            env,
                            CredentialRecord::new(task, "user", "")
                                .with_auth_token(format!("{}-{}", env, i)),
                        )
                        .expect("store");
                }
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_logouts_and_cache_reads() {
        let f = fixture();
        let session = Arc::new(f.session);
        let backend = f.backend.clone();
        let mut handles = Vec::new();

        for task in 0..4i64 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    match (task + i) % 4 {
                        0 => {
                            let user_id = task * 100 + i;
                            let record = CredentialRecord::new(user_id, "user", "")
                                .with_auth_token(format!("tok-{}", user_id));
                            assert!(session.on_login_succeeded(record).is_durable());
                        }
                        1 => session.on_logout(LogoutKind::Local).expect("logout"),
                        2 => session.cache().set(format!("patch:{}", i), i),
                        _ => {
                            if let Some(value) = session.cache().get::<i64>(&format!("patch:{}", i)) {
                                assert_eq!(value, i);
                            }
                        }
                    }

                    // Token and user id always come from the same record
                    if let Some(record) = session.active_credential() {
                        assert_eq!(
                            record.auth_token.as_deref(),
                            Some(format!("tok-{}", record.user_id).as_str())
                        );
                    }
                    let context = session.request_context();
                    assert_eq!(context.base_url, context.environment.base_url());
                }
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }

        // The in-memory view and secure storage agree once everything settles
        let restarted = Session::with_backend(&Config::default(), backend, f.clock.clone());
        assert_eq!(
            session.credential(Environment::Production),
            restarted.credential(Environment::Production)
        );

        session.on_login_succeeded(ada());
        assert!(session.cache().is_empty());
    }
}
