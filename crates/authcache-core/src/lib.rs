//! Client-side authentication sessions.
//!
//! Turns credentials into a persisted session, attaches its bearer token to
//! outgoing requests, and expires it when the stored deadline has passed.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, AuthEndpoints, Authority, RequestAugmenter};
pub use auth::{AuthError, Navigator, Route, Session, SessionManager, SessionState, SessionStore};
pub use config::{Config, StorageBackend};
pub use models::{Identity, Role};
