//! Single-flight session registry
//!
//! One slot per username, each behind an async mutex. A resolution holds
//! the slot's lock while it launches, so a concurrent resolution for the
//! same user waits for that launch and reuses its result instead of
//! starting a second backend.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A session whose liveness can be observed
pub trait LiveSession: Send + Sync {
    /// Whether the backend behind this session is still running
    fn is_alive(&self) -> bool;
}

type Slot<S> = Arc<Mutex<Option<Arc<S>>>>;

/// Sessions keyed by username
pub struct SessionRegistry<S> {
    slots: DashMap<String, Slot<S>>,
}

impl<S: LiveSession> SessionRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Return the live session for `username`, running `start` if there is none
    ///
    /// `start` runs at most once per call and never concurrently for the
    /// same username. A failed start leaves the slot empty.
    pub async fn get_or_start<F, Fut, E>(&self, username: &str, start: F) -> Result<Arc<S>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, E>>,
    {
        let slot = Arc::clone(self.slots.entry(username.to_string()).or_default().value());
        let mut current = slot.lock().await;

        if let Some(session) = current.as_ref() {
            if session.is_alive() {
                return Ok(Arc::clone(session));
            }
            tracing::debug!(%username, "session is dead, starting a new one");
        }

        let session = Arc::new(start().await?);
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Look up the current session for `username` without starting one
    pub fn get(&self, username: &str) -> Option<Arc<S>> {
        let slot = self.slots.get(username).map(|s| Arc::clone(s.value()))?;
        let session = Arc::clone(slot.try_lock().ok()?.as_ref()?);
        Some(session)
    }

    /// Drop the slot for `username` if its session is gone
    ///
    /// A slot that is busy starting a session is left alone. Returns
    /// whether the slot was removed.
    pub fn evict(&self, username: &str) -> bool {
        self.slots
            .remove_if(username, |_, slot| match slot.try_lock() {
                Ok(current) => current.as_ref().map_or(true, |s| !s.is_alive()),
                Err(_) => false,
            })
            .is_some()
    }

    /// All sessions not currently being started, with their usernames
    pub fn list(&self) -> Vec<(String, Arc<S>)> {
        self.slots
            .iter()
            .filter_map(|entry| {
                let session = Arc::clone(entry.value().try_lock().ok()?.as_ref()?);
                Some((entry.key().clone(), session))
            })
            .collect()
    }

    /// Number of usernames with a slot
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<S: LiveSession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSession {
        id: usize,
        alive: AtomicBool,
    }

    impl FakeSession {
        fn new(id: usize) -> Self {
            Self {
                id,
                alive: AtomicBool::new(true),
            }
        }
    }

    impl LiveSession for FakeSession {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_start_once() {
        let registry = Arc::new(SessionRegistry::<FakeSession>::new());
        let starts = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let starts = Arc::clone(&starts);
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_start("bob", || async {
                        let id = starts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(FakeSession::new(id))
                    })
                    .await
                    .unwrap()
                    .id
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 0);
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let registry = SessionRegistry::<FakeSession>::new();
        let bob = registry
            .get_or_start("bob", || async { Ok::<_, ()>(FakeSession::new(1)) })
            .await
            .unwrap();
        let alice = registry
            .get_or_start("alice", || async { Ok::<_, ()>(FakeSession::new(2)) })
            .await
            .unwrap();
        assert_eq!((bob.id, alice.id), (1, 2));

        let mut names: Vec<String> = registry.list().into_iter().map(|(name, _)| name).collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_dead_session_is_restarted() {
        let registry = SessionRegistry::<FakeSession>::new();
        let first = registry
            .get_or_start("bob", || async { Ok::<_, ()>(FakeSession::new(1)) })
            .await
            .unwrap();
        first.alive.store(false, Ordering::SeqCst);

        let second = registry
            .get_or_start("bob", || async { Ok::<_, ()>(FakeSession::new(2)) })
            .await
            .unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(registry.get("bob").unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_slot_empty() {
        let registry = SessionRegistry::<FakeSession>::new();
        let result = registry
            .get_or_start("bob", || async { Err::<FakeSession, _>("spawn failed") })
            .await;
        assert_eq!(result.err(), Some("spawn failed"));
        assert!(registry.get("bob").is_none());

        let session = registry
            .get_or_start("bob", || async { Ok::<_, &str>(FakeSession::new(7)) })
            .await
            .unwrap();
        assert_eq!(session.id, 7);
    }

    #[tokio::test]
    async fn test_evict_only_dead_sessions() {
        let registry = SessionRegistry::<FakeSession>::new();
        let session = registry
            .get_or_start("bob", || async { Ok::<_, ()>(FakeSession::new(1)) })
            .await
            .unwrap();

        assert!(!registry.evict("bob"));
        assert_eq!(registry.len(), 1);

        session.alive.store(false, Ordering::SeqCst);
        assert!(registry.evict("bob"));
        assert!(registry.is_empty());
        assert!(!registry.evict("bob"));
    }
}
