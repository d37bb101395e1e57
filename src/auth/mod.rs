//! Session authentication
//!
//! Token inspection and storage, the single-flight refresh coordinator and
//! session termination. CLI entry points live in [`commands`].

pub mod commands;
pub mod inspect;
pub mod refresh;
pub mod session;
pub mod tokens;

pub use commands::{login, logout, status};
pub use refresh::RefreshCoordinator;
pub use session::{ConsoleHost, SessionHost, SessionTerminator, SESSION_EXPIRED_NOTICE};
pub use tokens::{CredentialPair, MemoryTokenStore, TokenStore};
