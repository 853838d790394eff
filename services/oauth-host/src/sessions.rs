//! Cookie-keyed session registry
//!
//! Each browser gets a `sid` cookie holding a random uuid. The id maps to a
//! `SessionHandle` the OAuth client uses as its session-backed token store.
//! Sessions live in process memory only and are only minted when the
//! session storage backend is configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use oauth_client::SessionHandle;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "sid";

/// A resolved session for one request.
pub struct ResolvedSession {
    pub id: String,
    pub handle: SessionHandle,
    /// True when the request carried no known id and one was minted
    pub is_new: bool,
}

impl ResolvedSession {
    /// `Set-Cookie` value for a freshly minted session.
    pub fn set_cookie(&self) -> Option<String> {
        self.is_new
            .then(|| format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id))
    }
}

struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

/// In-memory sessions, bounded in count and idle lifetime.
///
/// Idle sessions are swept whenever a new one is minted; at capacity the
/// least recently used session is evicted.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Entry>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_sessions: max_sessions.max(1),
            idle_timeout,
        }
    }

    /// Look up the session named by the request's `Cookie` header, creating
    /// a new one when the header is absent or the id is unknown or expired.
    pub async fn resolve(&self, cookie_header: Option<&str>) -> ResolvedSession {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = cookie_header.and_then(session_id_from_cookies)
            && let Some(entry) = sessions.get_mut(id)
            && now.duration_since(entry.last_seen) < self.idle_timeout
        {
            entry.last_seen = now;
            return ResolvedSession {
                id: id.to_string(),
                handle: entry.handle.clone(),
                is_new: false,
            };
        }

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => break,
            }
        }
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "sessions evicted");
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let handle = SessionHandle::new();
        sessions.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                last_seen: now,
            },
        );
        debug!(sessions = sessions.len(), "session created");

        ResolvedSession {
            id,
            handle,
            is_new: true,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Extract the `sid` value from a `Cookie` header.
pub fn session_id_from_cookies(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}
