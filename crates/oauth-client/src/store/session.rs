//! Session-scoped token storage
//!
//! The host owns the session: it creates or looks up a `SessionHandle` per
//! end user and passes it in. The store only starts the session on first
//! use and reads/writes keys inside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error};

use super::{Field, TokenStore};
use crate::error::Result;

type SessionData = Option<HashMap<String, String>>;

/// Shared handle to one user's server-side session.
///
/// Cloning shares the same underlying session. A new handle is inactive
/// until `start` is called.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionData>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the session if it is not already active. Idempotent.
    pub fn start(&self) {
        let mut data = self.lock();
        if data.is_none() {
            *data = Some(HashMap::new());
            debug!("session started");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().as_ref().and_then(|data| data.get(key).cloned())
    }

    /// Insert a value, starting the session first if needed.
    pub fn insert(&self, key: &str, value: &str) {
        self.lock()
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
    }

    /// Insert several values under one lock.
    pub fn insert_all(&self, values: &[(&str, &str)]) {
        let mut data = self.lock();
        let data = data.get_or_insert_with(HashMap::new);
        for (key, value) in values {
            data.insert(key.to_string(), value.to_string());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|data| data.contains_key(key))
    }

    fn lock(&self) -> MutexGuard<'_, SessionData> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("session mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Token store backed by a host-supplied session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session: SessionHandle,
}

impl SessionStore {
    /// Wrap a session, starting it if it is not yet active.
    pub fn new(session: SessionHandle) -> Self {
        session.start();
        Self { session }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl TokenStore for SessionStore {
    fn get(&self, field: Field) -> Option<String> {
        self.session.get(field.key())
    }

    fn set(&self, field: Field, value: &str) -> Result<()> {
        self.session.insert(field.key(), value);
        Ok(())
    }

    fn set_all(&self, values: &[(Field, &str)]) -> Result<()> {
        let values: Vec<(&str, &str)> = values
            .iter()
            .map(|(field, value)| (field.key(), *value))
            .collect();
        self.session.insert_all(&values);
        Ok(())
    }

    fn is_authorized(&self) -> bool {
        self.session.contains(Field::Code.key())
    }
}
