//! Attaches the stored bearer token to outgoing requests.

use std::sync::Arc;

use reqwest::header::{self, HeaderValue};
use reqwest::{Request, Url};
use tracing::{debug, warn};

use crate::auth::SessionStore;

/// Login and registration URLs under a common base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login: String,
    pub register: String,
}

impl AuthEndpoints {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login: format!("{}/login", base),
            register: format!("{}/register", base),
        }
    }

    /// Whether `url` targets login or registration. Query strings and
    /// trailing slashes are ignored.
    pub fn matches(&self, url: &Url) -> bool {
        [&self.login, &self.register]
            .into_iter()
            .filter_map(|endpoint| Url::parse(endpoint).ok())
            .any(|endpoint| {
                endpoint.origin() == url.origin()
                    && endpoint.path().trim_end_matches('/') == url.path().trim_end_matches('/')
            })
    }
}

/// Per-request filter: auth endpoints pass through untouched, everything
/// else gets `Authorization: Bearer <token>` when a token is stored.
///
/// Only reads the store; expiry is never checked here.
#[derive(Clone)]
pub struct RequestAugmenter {
    store: Arc<SessionStore>,
    endpoints: AuthEndpoints,
}

impl RequestAugmenter {
    pub fn new(store: Arc<SessionStore>, endpoints: AuthEndpoints) -> Self {
        Self { store, endpoints }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    pub fn augment(&self, request: &mut Request) {
        if self.endpoints.matches(request.url()) {
            return;
        }

        let Some(token) = self.store.token() else {
            debug!(url = %request.url(), "No session token, sending unauthenticated");
            return;
        };

        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(header::AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "Stored token is not a valid header value"),
        }
    }
}
