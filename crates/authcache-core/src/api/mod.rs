//! HTTP side of the session manager.
//!
//! - `ApiClient`: reqwest client for login/registration and JSON calls
//! - `Authority`: the seam the session manager talks to
//! - `RequestAugmenter`: adds the stored bearer token to outgoing requests

pub mod augment;
pub mod client;
pub mod error;

pub use augment::{AuthEndpoints, RequestAugmenter};
pub use client::{ApiClient, AuthGrant, Authority, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
