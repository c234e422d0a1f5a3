//! Live SSE sessions keyed by their random identifier.

use crate::config::ProtocolConfig;
use crate::error::WebdialError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Random, unguessable session identifier, hex encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId([u8; ProtocolConfig::SESSION_ID_BYTES]);

impl SessionId {
    pub(crate) fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = WebdialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; ProtocolConfig::SESSION_ID_BYTES];
        hex::decode_to_slice(s, &mut id)
            .map_err(|e| WebdialError::protocol(format!("bad session id {:?}: {}", s, e)))?;
        Ok(Self(id))
    }
}

/// Concurrent map of live sessions.
///
/// Removal is final: an id handed out once is never registered again.
pub(crate) struct SessionRegistry<T> {
    sessions: Mutex<HashMap<SessionId, Arc<T>>>,
}

impl<T> SessionRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<T>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a session under a fresh id and store it.
    pub(crate) fn register(&self, build: impl FnOnce(SessionId) -> Arc<T>) -> Arc<T> {
        let mut sessions = self.lock();
        let mut id = SessionId::random();
        while sessions.contains_key(&id) {
            id = SessionId::random();
        }
        let session = build(id);
        sessions.insert(id, session.clone());
        session
    }

    pub(crate) fn get(&self, id: &SessionId) -> Option<Arc<T>> {
        self.lock().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &SessionId) -> Option<Arc<T>> {
        self.lock().remove(id)
    }

    /// Remove and return every session.
    pub(crate) fn drain(&self) -> Vec<Arc<T>> {
        self.lock().drain().map(|(_, session)| session).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
