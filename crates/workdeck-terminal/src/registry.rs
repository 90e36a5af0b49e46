//! Session Registry
//!
//! Concurrency-safe map from session identifier to [`TerminalSession`].
//! Each key holds a `OnceCell` slot: the map's shard lock is only held long
//! enough to find or insert the slot, and the process is spawned while
//! initialising the slot. Concurrent creators for the same identifier wait
//! on the same cell, so exactly one factory runs to success.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::TerminalSession;

type Slot = Arc<OnceCell<Arc<TerminalSession>>>;

/// Prefix of generated session identifiers
pub const SESSION_ID_PREFIX: &str = "term-";

/// Longest client-supplied session identifier accepted
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Whether a client-supplied identifier can name a session
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Registry of live terminal sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Slot>,
    max_sessions: Option<usize>,
    /// Live records plus creations in flight; bounded by `max_sessions`
    reserved: AtomicUsize,
}

impl SessionRegistry {
    /// Create an unbounded registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of live sessions
    #[must_use]
    pub fn with_max_sessions(mut self, max: Option<usize>) -> Self {
        self.max_sessions = max;
        self
    }

    /// Return the session for `id`, creating it with `factory` if absent.
    ///
    /// The boolean is `true` when this call created the session. Spawn
    /// failures leave no record behind. A created session is removed from
    /// the registry automatically when its process exits.
    pub async fn get_or_create<F>(
        self: &Arc<Self>,
        id: &str,
        factory: F,
    ) -> Result<(Arc<TerminalSession>, bool)>
    where
        F: FnOnce(&str) -> Result<TerminalSession>,
    {
        let slot: Slot = self.sessions.entry(id.to_string()).or_default().value().clone();

        let created = AtomicBool::new(false);
        let created_ref = &created;
        let result = slot
            .get_or_try_init(move || async move {
                self.reserve()?;
                let session = factory(id).inspect_err(|_| self.release())?;
                created_ref.store(true, Ordering::SeqCst);
                Ok(Arc::new(session))
            })
            .await;

        match result {
            Ok(session) => {
                let session = session.clone();
                let created = created.load(Ordering::SeqCst);
                if created {
                    self.remove_on_exit(&session);
                } else {
                    debug!(session_id = %id, "Reusing existing session");
                }
                Ok((session, created))
            }
            Err(e) => {
                self.sessions
                    .remove_if(id, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                Err(e)
            }
        }
    }

    fn reserve(&self) -> Result<()> {
        match self.max_sessions {
            Some(max) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(|_| Error::MaxSessionsExceeded(max)),
            None => {
                self.reserved.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }

    fn remove_on_exit(self: &Arc<Self>, session: &Arc<TerminalSession>) {
        let registry = Arc::downgrade(self);
        let id = session.id().to_string();
        let instance = session.instance();
        session.process().on_exit(move |code| {
            if let Some(registry) = registry.upgrade() {
                if registry.remove_instance(&id, instance) {
                    info!(session_id = %id, code = ?code, "Session removed after process exit");
                }
            }
        });
    }

    /// Look up a live record
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.get(id).and_then(|slot| slot.get().cloned())
    }

    /// Whether a record exists for `id`
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Delete the record for `id`. The caller kills the process first.
    ///
    /// Slots still being created are left alone.
    pub fn remove(&self, id: &str) -> Option<Arc<TerminalSession>> {
        let (_, slot) = self.sessions.remove_if(id, |_, slot| slot.initialized())?;
        self.release();
        slot.get().cloned()
    }

    /// Delete the record for `id` only if it is still `instance`
    pub fn remove_instance(&self, id: &str, instance: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, slot| {
                slot.get().is_some_and(|s| s.instance() == instance)
            })
            .is_some();
        if removed {
            self.release();
        }
        removed
    }

    /// Copy of all live records; safe to hold while the registry changes
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<TerminalSession>> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Number of live records
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Whether the registry holds no live records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generate an identifier not currently in use
    #[must_use]
    pub fn allocate_id(&self) -> String {
        loop {
            let id = format!(
                "{}{}",
                SESSION_ID_PREFIX,
                &Uuid::new_v4().simple().to_string()[..12]
            );
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Kill and evict one session; returns whether it existed
    pub fn terminate(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.terminate();
                self.remove_instance(id, session.instance());
                true
            }
            None => false,
        }
    }

    /// Kill and evict every session. Returns how many were live.
    pub fn shutdown(&self) -> usize {
        let sessions = self.snapshot();
        for session in &sessions {
            session.terminate();
            self.remove_instance(session.id(), session.instance());
        }
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Terminated all sessions");
        }
        sessions.len()
    }
}
