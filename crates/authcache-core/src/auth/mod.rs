//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `SessionManager`: login, registration, sign-out and observable state
//! - `SessionStore`: persisted identity, bearer token and expiry
//! - `Storage` backends: in-memory, JSON file, and OS keychain
//!
//! Sessions last one day, or thirty with "remember me" and for new accounts.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;
pub mod storage;
pub mod validation;

pub use credentials::KeyringStorage;
pub use error::AuthError;
pub use manager::{Navigator, Route, SessionManager, SessionState};
pub use session::{Session, SessionStore};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
