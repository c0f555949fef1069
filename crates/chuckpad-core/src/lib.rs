//! Core library for the ChuckPad social client.
//!
//! Provides the pieces every API call goes through:
//!
//! - `cache`: time-expiring in-memory cache for decoded API responses
//! - `vault`: secure, per-environment credential storage
//! - `environment`: the active backend environment and its base URL
//! - `session`: the process-wide context tying those together
//! - `config`: persisted settings (last environment, patch type, cache sizing)
//!
//! HTTP transport and the live-session channel live outside this crate and
//! call into `Session`.

pub mod cache;
pub mod clock;
pub mod config;
pub mod environment;
pub mod models;
pub mod session;
pub mod vault;

pub use cache::{CacheKey, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use environment::{Environment, EnvironmentManager, ParseEnvironmentError};
pub use models::{FieldUpdate, PatchType, PatchUpdate, User};
pub use session::{LoginPersistence, LogoutKind, RequestContext, Session, SessionEvent};
pub use vault::{CredentialRecord, CredentialVault, VaultError};
