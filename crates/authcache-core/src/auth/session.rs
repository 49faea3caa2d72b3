use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::error::AuthError;
use super::storage::{Change, Storage, StorageError};
use crate::models::Identity;

/// Storage key holding the bearer token
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Storage key holding the JSON-encoded identity
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Storage key holding the expiry as epoch milliseconds
pub const AUTH_EXPIRY_KEY: &str = "authExpiry";

/// Session length in days when "remember me" is checked at login.
pub const REMEMBER_ME_DAYS: u32 = 30;

/// Session length in days for a plain login.
pub const DEFAULT_SESSION_DAYS: u32 = 1;

/// New accounts always get the long-lived session.
pub const REGISTRATION_SESSION_DAYS: u32 = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Seconds in a day, for rounding remaining time up to whole days.
const SECS_PER_DAY: i64 = 86_400;

impl Session {
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Days remaining, counting a started day as a whole one (for display)
    pub fn days_until_expiry(&self) -> i64 {
        let secs = self.time_until_expiry().num_seconds();
        if secs <= 0 {
            0
        } else {
            (secs + SECS_PER_DAY - 1) / SECS_PER_DAY
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

enum Stored {
    Empty,
    Complete(Session),
    Partial,
    Corrupt(serde_json::Error),
}

/// Durable home of the current session: identity, bearer token and expiry.
///
/// All three keys are written and removed under one write lock with a single
/// storage batch, so readers see either a whole session or none of it.
pub struct SessionStore {
    storage: RwLock<Box<dyn Storage>>,
}

impl SessionStore {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self::from_boxed(Box::new(storage))
    }

    pub fn from_boxed(storage: Box<dyn Storage>) -> Self {
        Self {
            storage: RwLock::new(storage),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Box<dyn Storage>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Storage>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a new session expiring `remember_days` from now.
    pub fn save(
        &self,
        identity: &Identity,
        token: &str,
        remember_days: u32,
    ) -> Result<Session, StorageError> {
        self.save_at(identity, token, remember_days, Utc::now())
    }

    pub(crate) fn save_at(
        &self,
        identity: &Identity,
        token: &str,
        remember_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Session, StorageError> {
        // Whole milliseconds, the precision authExpiry is stored at
        let expires_at = Duration::try_days(i64::from(remember_days))
            .and_then(|length| now.checked_add_signed(length))
            .and_then(|deadline| DateTime::<Utc>::from_timestamp_millis(deadline.timestamp_millis()))
            .ok_or(StorageError::ExpiryOutOfRange(remember_days))?;

        let session = Session {
            identity: identity.clone(),
            token: token.to_string(),
            expires_at,
        };

        let user_json = serde_json::to_string(&session.identity)?;
        let expiry = session.expires_at.timestamp_millis().to_string();

        let storage = self.write();
        if let Err(e) = storage.write_batch(&[
            (CURRENT_USER_KEY, Some(user_json)),
            (AUTH_TOKEN_KEY, Some(session.token.clone())),
            (AUTH_EXPIRY_KEY, Some(expiry)),
        ]) {
            Self::clear_locked(&**storage);
            return Err(e);
        }

        debug!(user_id = session.identity.id, remember_days, expires_at = %session.expires_at, "Session saved");
        Ok(session)
    }

    /// Rebuild the persisted session.
    ///
    /// Anything short of a complete, parseable session is discarded and
    /// reported as `None`; this never fails.
    pub fn load(&self) -> Option<Session> {
        let storage = self.write();

        let stored = match Self::read_stored(&**storage) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                return None;
            }
        };

        match stored {
            Stored::Empty => None,
            Stored::Complete(session) => {
                debug!(user_id = session.identity.id, "Session loaded");
                Some(session)
            }
            Stored::Partial => {
                warn!("Discarding incomplete stored session");
                Self::clear_locked(&**storage);
                None
            }
            Stored::Corrupt(e) => {
                let err = AuthError::StorageCorrupt(e.to_string());
                warn!(error = %err, "Discarding stored session");
                Self::clear_locked(&**storage);
                None
            }
        }
    }

    fn read_stored(storage: &dyn Storage) -> Result<Stored, StorageError> {
        let user = storage.get(CURRENT_USER_KEY)?;
        let token = storage.get(AUTH_TOKEN_KEY)?;
        let expiry = storage.get(AUTH_EXPIRY_KEY)?;

        let Some(user) = user else {
            return Ok(if token.is_none() && expiry.is_none() {
                Stored::Empty
            } else {
                Stored::Partial
            });
        };

        let identity: Identity = match serde_json::from_str(&user) {
            Ok(identity) => identity,
            Err(e) => return Ok(Stored::Corrupt(e)),
        };

        match (token, expiry.as_deref().and_then(parse_expiry)) {
            (Some(token), Some(expires_at)) if !token.is_empty() => Ok(Stored::Complete(Session {
                identity,
                token,
                expires_at,
            })),
            _ => Ok(Stored::Partial),
        }
    }

    /// Remove the whole session.
    pub fn clear(&self) -> Result<(), StorageError> {
        let storage = self.write();
        storage.write_batch(&removals())?;
        debug!("Session cleared");
        Ok(())
    }

    fn clear_locked(storage: &dyn Storage) {
        if let Err(e) = storage.write_batch(&removals()) {
            warn!(error = %e, "Failed to discard stored session");
        }
    }

    /// True when a persisted expiry exists and lies strictly in the past.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let raw = match self.read().get(AUTH_EXPIRY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to read session expiry");
                return false;
            }
        };

        match parse_expiry(&raw) {
            Some(expires_at) => expires_at < now,
            None => {
                // An expiry we cannot read never vouches for a session
                warn!(value = %raw, "Unreadable session expiry, treating as expired");
                true
            }
        }
    }

    /// The persisted bearer token. A token without a readable expiry is
    /// left over from an interrupted write and is never handed out.
    pub fn token(&self) -> Option<String> {
        let storage = self.read();
        let read = storage
            .get(AUTH_TOKEN_KEY)
            .and_then(|token| Ok((token, storage.get(AUTH_EXPIRY_KEY)?)));

        match read {
            Ok((token, expiry)) => {
                expiry.as_deref().and_then(parse_expiry)?;
                token.filter(|t| !t.is_empty())
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session token");
                None
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read()
            .get(AUTH_EXPIRY_KEY)
            .ok()
            .flatten()
            .as_deref()
            .and_then(parse_expiry)
    }
}

fn removals() -> [Change<'static>; 3] {
    [
        (CURRENT_USER_KEY, None),
        (AUTH_TOKEN_KEY, None),
        (AUTH_EXPIRY_KEY, None),
    ]
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::storage::MemoryStorage;
    use crate::models::Role;

    fn identity() -> Identity {
        Identity {
            id: 42,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            role: Role::User,
        }
    }

    fn store() -> (SessionStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        (SessionStore::new(storage.clone()), storage)
    }

    #[test]
    fn test_save_writes_all_keys() {
        let (store, storage) = store();
        let now = Utc::now();
        let session = store.save_at(&identity(), "t1", DEFAULT_SESSION_DAYS, now).unwrap();

        assert_eq!(storage.get(AUTH_TOKEN_KEY).unwrap().as_deref(), Some("t1"));
        assert_eq!(
            storage.get(AUTH_EXPIRY_KEY).unwrap(),
            Some((now + Duration::days(1)).timestamp_millis().to_string())
        );
        let user: Identity =
            serde_json::from_str(&storage.get(CURRENT_USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(user, identity());
        assert_eq!(
            session.expires_at.timestamp_millis(),
            (now + Duration::days(1)).timestamp_millis()
        );
    }

    #[test]
    fn test_save_then_load_round_trips_identity() {
        let (store, _) = store();
        let saved = store.save(&identity(), "t1", REMEMBER_ME_DAYS).unwrap();

        let loaded = store.load().expect("session should load");
        assert_eq!(loaded, saved);
        assert_eq!(loaded.identity, identity());
        assert_eq!(loaded.token, "t1");
        assert_eq!(store.token().as_deref(), Some("t1"));
    }

    #[test]
    fn test_load_empty_store() {
        let (store, _) = store();
        assert!(store.load().is_none());
        assert!(!store.is_expired());
        assert!(store.token().is_none());
    }

    #[test]
    fn test_corrupt_identity_is_discarded() {
        let (store, storage) = store();
        storage.set(CURRENT_USER_KEY, "{not json").unwrap();
        storage.set(AUTH_TOKEN_KEY, "t1").unwrap();
        storage.set(AUTH_EXPIRY_KEY, "99999999999999").unwrap();

        assert!(store.load().is_none());
        assert_eq!(storage.get(CURRENT_USER_KEY).unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_partial_session_is_discarded() {
        let (store, storage) = store();
        storage.set(AUTH_TOKEN_KEY, "orphan").unwrap();

        assert!(store.load().is_none());
        assert!(storage.is_empty());

        let user = serde_json::to_string(&identity()).unwrap();
        storage.set(CURRENT_USER_KEY, &user).unwrap();
        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let (store, storage) = store();
        store.save(&identity(), "t1", 1).unwrap();
        store.clear().unwrap();

        assert!(storage.is_empty());
        assert!(store.load().is_none());

        // Clearing an empty store is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_expiry_boundary() {
        let (store, _) = store();
        // Sub-millisecond part included on purpose
        let saved_at = Utc::now() + Duration::microseconds(1500);
        let deadline = store.save_at(&identity(), "t1", 1, saved_at).unwrap().expires_at;
        assert_eq!(deadline, store.expires_at().unwrap());

        assert!(!store.is_expired_at(saved_at));
        assert!(!store.is_expired_at(deadline - Duration::milliseconds(1)));
        assert!(!store.is_expired_at(deadline));
        assert!(store.is_expired_at(deadline + Duration::milliseconds(1)));
    }

    #[test]
    fn test_expiry_for_each_remember_length() {
        let (store, _) = store();
        let saved_at = Utc::now();
        for days in [DEFAULT_SESSION_DAYS, REMEMBER_ME_DAYS] {
            store.save_at(&identity(), "t1", days, saved_at).unwrap();
            let deadline = saved_at + Duration::days(i64::from(days));
            assert!(!store.is_expired_at(deadline - Duration::seconds(1)));
            assert!(store.is_expired_at(deadline + Duration::seconds(1)));
        }
    }

    #[test]
    fn test_out_of_range_session_length_is_an_error() {
        let (store, storage) = store();
        let err = store.save(&identity(), "t1", u32::MAX).unwrap_err();

        assert!(matches!(err, StorageError::ExpiryOutOfRange(u32::MAX)));
        assert!(storage.is_empty());
        assert!(store.token().is_none());
    }

    /// Memory storage whose `set` fails for one key, leaving earlier writes in place.
    struct FailingKey {
        inner: MemoryStorage,
        key: &'static str,
    }

    impl Storage for FailingKey {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.key {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_save_leaves_no_token_behind() {
        let storage = MemoryStorage::new();
        let store = SessionStore::new(FailingKey {
            inner: storage.clone(),
            key: AUTH_EXPIRY_KEY,
        });

        assert!(store.save(&identity(), "t1", 1).is_err());

        assert!(storage.is_empty());
        assert!(store.token().is_none());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_token_without_expiry_is_withheld() {
        let (store, storage) = store();
        storage.set(AUTH_TOKEN_KEY, "orphan").unwrap();
        assert!(store.token().is_none());

        storage.set(AUTH_EXPIRY_KEY, "garbage").unwrap();
        assert!(store.token().is_none());

        storage
            .set(AUTH_EXPIRY_KEY, &(Utc::now() + Duration::days(1)).timestamp_millis().to_string())
            .unwrap();
        assert_eq!(store.token().as_deref(), Some("orphan"));
    }

    #[test]
    fn test_unreadable_expiry_counts_as_expired() {
        let (store, storage) = store();
        storage.set(AUTH_EXPIRY_KEY, "tomorrow").unwrap();
        assert!(store.is_expired());
        assert!(store.expires_at().is_none());
    }

    #[test]
    fn test_days_until_expiry_rounds_up() {
        let (store, _) = store();
        let plain = store.save(&identity(), "t1", DEFAULT_SESSION_DAYS).unwrap();
        assert_eq!(plain.days_until_expiry(), 1);

        let remembered = store.save(&identity(), "t1", REMEMBER_ME_DAYS).unwrap();
        assert_eq!(remembered.days_until_expiry(), 30);

        let lapsed = Session {
            expires_at: Utc::now() - Duration::hours(1),
            ..plain
        };
        assert_eq!(lapsed.days_until_expiry(), 0);
    }

    #[test]
    fn test_session_debug_hides_token() {
        let (store, _) = store();
        let session = store.save(&identity(), "super-secret", 1).unwrap();
        let printed = format!("{:?}", session);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_readers_never_see_partial_session() {
        let storage = MemoryStorage::new();
        let store = Arc::new(SessionStore::new(storage.clone()));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.save(&identity(), &format!("t{}", i), 1).unwrap();
                    store.clear().unwrap();
                }
            })
        };

        for _ in 0..500 {
            let snapshot = storage.snapshot();
            let present = [AUTH_TOKEN_KEY, CURRENT_USER_KEY, AUTH_EXPIRY_KEY]
                .iter()
                .filter(|key| snapshot.contains_key(**key))
                .count();
            assert!(present == 0 || present == 3, "partial session observed");

            if let Some(session) = store.load() {
                assert!(!session.token.is_empty());
                assert_eq!(session.identity, identity());
            }
        }

        writer.join().unwrap();
    }
}
