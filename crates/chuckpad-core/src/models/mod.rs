//! Data models the session layer keys on.
//!
//! - `User`: identity returned by login and registration
//! - `PatchType`: which application's patches a session works with
//! - `PatchUpdate`, `FieldUpdate`: partial patch edits where "unset" means "no change"

pub mod patch;
pub mod user;

pub use patch::{FieldUpdate, PatchType, PatchUpdate};
pub use user::User;
