use thiserror::Error;

use crate::environment::Environment;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Secure storage error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Secure storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode credential record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stored credential for {environment} is unreadable: {reason}")]
    Corrupt {
        environment: Environment,
        reason: String,
    },

    #[error("No credential stored for {0}")]
    NotLoggedIn(Environment),

    #[error("User id is permanent (stored {stored}, update attempted {attempted})")]
    UserIdChanged { stored: i64, attempted: i64 },
}
