//! Grants, tokens, users and sessions.

pub mod grants;
pub mod session;
pub mod token;
pub mod user;

pub use grants::{GrantTrie, check_grants};
pub use session::{Session, SessionStore};
pub use token::{Token, TokenClaims, TokenIssuer, VerifyOptions};
pub use user::{Role, User};
