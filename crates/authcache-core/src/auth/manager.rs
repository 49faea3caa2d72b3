//! Session manager: credential submission, sign-out, startup restore, and the
//! observable state (current user, loading flag, last error) a UI renders.
//!
//! Each piece of observable state is a `tokio::sync::watch` cell. The manager
//! is the only writer; any number of receivers can follow along.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::AuthError;
use super::session::{
    Session, SessionStore, DEFAULT_SESSION_DAYS, REGISTRATION_SESSION_DAYS, REMEMBER_ME_DAYS,
};
use super::validation;
use crate::api::{AuthEndpoints, AuthGrant, Authority, RequestAugmenter};
use crate::models::Identity;

/// Where the application should go next. The manager only asks; routing is
/// up to the caller.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, path: &str) {
        self(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/home",
            Route::Login => "/login",
        }
    }
}

/// Externally visible session state. Expiry is detected and collapsed into
/// `Anonymous` in one step, so it never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Held for the lifetime of one submission. Dropping it (normally or because
/// the submitting future was cancelled) always lowers the loading flag.
struct Submission<'a> {
    manager: &'a SessionManager,
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        self.manager.loading.send_replace(false);
        self.manager.submitting.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    authority: Arc<dyn Authority>,
    navigator: Arc<dyn Navigator>,
    current_user: watch::Sender<Option<Identity>>,
    loading: watch::Sender<bool>,
    error: watch::Sender<Option<String>>,
    submitting: AtomicBool,
}

impl SessionManager {
    /// Create the manager and restore any persisted session.
    ///
    /// A stored session that has already expired is cleared before this
    /// returns, exactly as if the user had signed out.
    pub fn new(
        store: Arc<SessionStore>,
        authority: Arc<dyn Authority>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let manager = Self {
            store,
            authority,
            navigator,
            current_user: watch::channel(None).0,
            loading: watch::channel(false).0,
            error: watch::channel(None).0,
            submitting: AtomicBool::new(false),
        };
        manager.restore();
        manager
    }

    fn restore(&self) {
        let identity = self.store.load().map(|session| session.identity);
        debug!(restored = identity.is_some(), "Session restored from storage");
        self.current_user.send_replace(identity);

        if self.store.is_expired() {
            info!("Stored session has expired");
            self.sign_out();
        }
    }

    // =========================================================================
    // Credential submission
    // =========================================================================

    pub async fn submit_login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Session, AuthError> {
        let _submission = self.begin_submission()?;
        let result = self.login(email, password, remember_me).await;
        self.record(result)
    }

    pub async fn submit_registration(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let _submission = self.begin_submission()?;
        let result = self.register(first_name, last_name, email, password).await;
        self.record(result)
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Session, AuthError> {
        validation::validate_login(email, password).map_err(AuthError::InvalidInput)?;

        let grant = self.authority.login(email, password).await?;
        let remember_days = if remember_me {
            REMEMBER_ME_DAYS
        } else {
            DEFAULT_SESSION_DAYS
        };
        self.establish(grant, remember_days)
    }

    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        validation::validate_registration(first_name, last_name, email, password)
            .map_err(AuthError::InvalidInput)?;

        let grant = self
            .authority
            .register(first_name, last_name, email, password)
            .await?;
        self.establish(grant, REGISTRATION_SESSION_DAYS)
    }

    fn establish(&self, grant: AuthGrant, remember_days: u32) -> Result<Session, AuthError> {
        let session = self.store.save(&grant.user, &grant.token, remember_days)?;
        self.current_user.send_replace(Some(session.identity.clone()));
        info!(user_id = session.identity.id, remember_days, "Signed in");
        self.navigator.navigate(Route::Home.path());
        Ok(session)
    }

    /// Only one submission runs at a time; a second one is turned away
    /// without touching the first one's loading or error state.
    fn begin_submission(&self) -> Result<Submission<'_>, AuthError> {
        if self
            .submitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Submission rejected, another one is still running");
            return Err(AuthError::InProgress);
        }

        self.loading.send_replace(true);
        self.error.send_replace(None);
        Ok(Submission { manager: self })
    }

    fn record(&self, result: Result<Session, AuthError>) -> Result<Session, AuthError> {
        if let Err(ref e) = result {
            error!(error = %e, "Authentication failed");
            self.error.send_replace(Some(e.to_string()));
        }
        result
    }

    // =========================================================================
    // Sign-out
    // =========================================================================

    /// Forget the session and send the user to the login page. Safe to call
    /// with no active session.
    pub fn sign_out(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        let had_user = self.current_user.send_replace(None).is_some();
        self.error.send_replace(None);
        if had_user {
            info!("Signed out");
        }
        self.navigator.navigate(Route::Login.path());
    }

    // =========================================================================
    // Observable state
    // =========================================================================

    pub fn current_user(&self) -> Option<Identity> {
        self.current_user.borrow().clone()
    }

    pub fn subscribe_user(&self) -> watch::Receiver<Option<Identity>> {
        self.current_user.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    /// A user is cached and the stored expiry has not passed.
    pub fn is_authenticated(&self) -> bool {
        self.current_user.borrow().is_some() && !self.store.is_expired()
    }

    pub fn state(&self) -> SessionState {
        if self.is_loading() {
            SessionState::Authenticating
        } else if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn token(&self) -> Option<String> {
        self.store.token()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Filter for outbound requests backed by this manager's store.
    pub fn request_augmenter(&self, endpoints: AuthEndpoints) -> RequestAugmenter {
        RequestAugmenter::new(Arc::clone(&self.store), endpoints)
    }
}
