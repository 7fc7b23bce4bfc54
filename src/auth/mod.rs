//! Accounts and bearer sessions.
//!
//! Passwords are bcrypt-hashed; session tokens are opaque `cl_` strings
//! stored only as SHA-256 digests.

pub mod service;
pub mod tokens;
pub mod users;

pub use service::AuthService;
pub use tokens::{TokenStore, constant_time_eq, generate_session_token, hash_token};
pub use users::{User, UserStore, normalize_email};
