//! Per-intent session store (component C).
//!
//! A session tracks one MPC execution of the protocol engine for a single
//! intent: its named share slots, its status, and the timestamps needed for
//! garbage collection. The store itself only owns bookkeeping; the
//! orchestrator decides when phases advance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use rand::RngCore;

use crate::error::CoreError;
use crate::sharing::PartyView;
use crate::PartyId;

/// Lifecycle status of a session, advancing strictly left to right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Sharing,
    Computing,
    Reconstructing,
    Completed,
    Failed,
}

impl SessionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// One MPC execution for a single intent.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub intent_id: String,
    pub parties: [PartyId; 3],
    pub my_party_id: PartyId,
    pub status: SessionStatus,
    named_shares: HashMap<String, PartyView>,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

impl Session {
    /// The view stored under `name`, if any.
    pub fn share(&self, name: &str) -> Option<&PartyView> {
        self.named_shares.get(name)
    }
}

/// Thread-safe store of sessions, keyed by `session_id`.
///
/// Access is serialised per session via a single mutex over the whole map;
/// the spec permits cross-session concurrency but the map itself is small
/// and short-lived enough that a single lock keeps the implementation
/// straightforward, matching the "simple lock... suffices" guidance given
/// for the peer directory.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new session for `intent_id`, generating a fresh, collision-free
    /// `session_id` of the form `{intent_id}-{8 hex nibbles}` even if the same
    /// intent is retried.
    pub fn create(&self, intent_id: &str, parties: [PartyId; 3], my_party_id: PartyId) -> Session {
        let mut guard = self.sessions.lock().expect("session store poisoned");
        let session_id = loop {
            let candidate = format!("{intent_id}-{:08x}", rand::thread_rng().next_u32());
            if !guard.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Session {
            session_id: session_id.clone(),
            intent_id: intent_id.to_string(),
            parties,
            my_party_id,
            status: SessionStatus::Initializing,
            named_shares: HashMap::new(),
            start_time: SystemTime::now(),
            end_time: None,
        };
        guard.insert(session_id, session.clone());
        session
    }

    pub fn get_by_session_id(&self, session_id: &str) -> Option<Session> {
        let guard = self.sessions.lock().expect("session store poisoned");
        guard.get(session_id).cloned()
    }

    /// First session matching `intent_id`, by no particular order beyond
    /// whatever the backing map yields.
    pub fn get_by_intent_id(&self, intent_id: &str) -> Option<Session> {
        let guard = self.sessions.lock().expect("session store poisoned");
        guard
            .values()
            .find(|session| session.intent_id == intent_id)
            .cloned()
    }

    pub fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), CoreError> {
        let mut guard = self.sessions.lock().expect("session store poisoned");
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        session.status = status;
        if status.is_terminal() {
            session.end_time = Some(SystemTime::now());
        }
        Ok(())
    }

    /// Store a view under `name`. Shares are write-once: a second write for
    /// the same name is rejected rather than overwriting the first.
    pub fn put_share(
        &self,
        session_id: &str,
        name: &str,
        view: PartyView,
    ) -> Result<(), CoreError> {
        let mut guard = self.sessions.lock().expect("session store poisoned");
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        if session.named_shares.contains_key(name) {
            return Err(CoreError::ShareAlreadySet(name.to_string()));
        }
        session.named_shares.insert(name.to_string(), view);
        Ok(())
    }

    pub fn get_share(&self, session_id: &str, name: &str) -> Result<PartyView, CoreError> {
        let guard = self.sessions.lock().expect("session store poisoned");
        let session = guard
            .get(session_id)
            .ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        session
            .share(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownShare {
                session_id: session_id.to_string(),
                name: name.to_string(),
            })
    }

    pub fn delete(&self, session_id: &str) {
        let mut guard = self.sessions.lock().expect("session store poisoned");
        guard.remove(session_id);
    }

    /// Remove completed/failed sessions whose `end_time` is older than
    /// `max_age`. Returns the number of sessions removed.
    pub fn gc(&self, max_age: Duration) -> usize {
        let mut guard = self.sessions.lock().expect("session store poisoned");
        let now = SystemTime::now();
        let before = guard.len();
        guard.retain(|_, session| match session.end_time {
            Some(end_time) if session.status.is_terminal() => {
                now.duration_since(end_time).unwrap_or(Duration::ZERO) < max_age
            }
            _ => true,
        });
        before - guard.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;
    use std::thread::sleep;

    fn parties() -> [PartyId; 3] {
        [0, 1, 2]
    }

    #[test]
    fn create_generates_unique_ids_for_retried_intent() {
        let store = SessionStore::new();
        let a = store.create("intent-1", parties(), 0);
        let b = store.create("intent-1", parties(), 0);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("intent-1-"));
    }

    #[test]
    fn shares_are_write_once() {
        let store = SessionStore::new();
        let session = store.create("intent-2", parties(), 1);
        let view = PartyView::new(Field::from_u64(1), Field::from_u64(2));
        store
            .put_share(&session.session_id, "capacity_0", view.clone())
            .unwrap();
        let err = store
            .put_share(&session.session_id, "capacity_0", view)
            .unwrap_err();
        assert_eq!(err, CoreError::ShareAlreadySet("capacity_0".to_string()));
    }

    #[test]
    fn get_share_reports_unknown_session_and_unknown_share() {
        let store = SessionStore::new();
        assert_eq!(
            store.get_share("missing", "x"),
            Err(CoreError::UnknownSession("missing".to_string()))
        );
        let session = store.create("intent-3", parties(), 2);
        assert_eq!(
            store.get_share(&session.session_id, "capacity_0"),
            Err(CoreError::UnknownShare {
                session_id: session.session_id.clone(),
                name: "capacity_0".to_string(),
            })
        );
    }

    #[test]
    fn gc_removes_only_old_terminal_sessions() {
        let store = SessionStore::new();
        let stays_active = store.create("intent-4", parties(), 0);
        let stays_recent = store.create("intent-5", parties(), 0);
        let gets_collected = store.create("intent-6", parties(), 0);

        store
            .update_status(&stays_recent.session_id, SessionStatus::Completed)
            .unwrap();
        store
            .update_status(&gets_collected.session_id, SessionStatus::Failed)
            .unwrap();
        sleep(Duration::from_millis(20));

        let removed = store.gc(Duration::from_millis(5));
        assert!(store.get_by_session_id(&gets_collected.session_id).is_none());
        assert!(store.get_by_session_id(&stays_recent.session_id).is_none());
        assert!(store.get_by_session_id(&stays_active.session_id).is_some());
        assert_eq!(removed, 2);
    }

    #[test]
    fn get_by_intent_id_finds_first_match() {
        let store = SessionStore::new();
        let session = store.create("intent-7", parties(), 0);
        let found = store.get_by_intent_id("intent-7").unwrap();
        assert_eq!(found.session_id, session.session_id);
        assert!(store.get_by_intent_id("no-such-intent").is_none());
    }
}
