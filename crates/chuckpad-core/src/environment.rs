//! Backend environment selection.
//!
//! The service runs as three deployments. Exactly one is active at a time;
//! switching only changes which base URL and which credential record new
//! calls resolve against. Nothing stored for the other environments is touched.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

// ============================================================================
// Constants
// ============================================================================

const PRODUCTION_BASE_URL: &str = "https://chuckpad-social.herokuapp.com";
const STAGE_BASE_URL: &str = "https://chuckpad-social-stage.herokuapp.com";
const LOCAL_BASE_URL: &str = "http://localhost:9292";

// ============================================================================
// Environment
// ============================================================================

/// Backend deployment. Declaration order is the toggle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Stage,
    Local,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Production,
        Environment::Stage,
        Environment::Local,
    ];

    /// Next environment in the toggle cycle (Production -> Stage -> Local -> Production).
    pub fn next(&self) -> Self {
        match self {
            Environment::Production => Environment::Stage,
            Environment::Stage => Environment::Local,
            Environment::Local => Environment::Production,
        }
    }

    /// Root URL API calls are made against.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_BASE_URL,
            Environment::Stage => STAGE_BASE_URL,
            Environment::Local => LOCAL_BASE_URL,
        }
    }

    /// Stable lowercase name, used in storage keys and cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Stage => "stage",
            Environment::Local => "local",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown environment '{0}' (expected production, stage or local)")]
pub struct ParseEnvironmentError(String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "stage" | "staging" => Ok(Environment::Stage),
            "local" => Ok(Environment::Local),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

// ============================================================================
// EnvironmentManager
// ============================================================================

/// Tracks the active environment.
#[derive(Debug, Default)]
pub struct EnvironmentManager {
    active: Mutex<Environment>,
}

impl EnvironmentManager {
    pub fn new(initial: Environment) -> Self {
        Self {
            active: Mutex::new(initial),
        }
    }

    pub fn active(&self) -> Environment {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch to `environment`. Returns the environment that was active before.
    pub fn set_environment(&self, environment: Environment) -> Environment {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *active, environment);
        if previous != environment {
            info!(from = %previous, to = %environment, "Environment changed");
        }
        previous
    }

    /// Advance to the next environment in the cycle.
    /// Returns `(previous, next)` as read and written under one lock.
    pub fn toggle_environment(&self) -> (Environment, Environment) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *active;
        let next = previous.next();
        *active = next;
        info!(from = %previous, to = %next, "Environment toggled");
        (previous, next)
    }

    pub fn base_url(&self) -> &'static str {
        self.active().base_url()
    }

    pub fn is_local_environment(&self) -> bool {
        self.active() == Environment::Local
    }

    /// Active environment and its base URL from a single read.
    pub fn snapshot(&self) -> (Environment, &'static str) {
        let active = self.active();
        (active, active.base_url())
    }
}
