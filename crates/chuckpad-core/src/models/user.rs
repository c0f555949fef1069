use serde::{Deserialize, Serialize};

use crate::vault::CredentialRecord;

/// Account identity as returned by the login and registration endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "id", alias = "user_id")]
    pub user_id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "admin", default)]
    pub is_admin: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl From<User> for CredentialRecord {
    fn from(user: User) -> Self {
        CredentialRecord {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            auth_token: user.auth_token,
        }
    }
}
