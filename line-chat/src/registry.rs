use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::session::{SessionHandle, SessionId};

const DEFAULT_USERNAME_PREFIX: &str = "user";

/// Directory of connected sessions keyed by username.
///
/// Every mutation and every snapshot taken for delivery goes through one mutex.
/// The lock is only held for in-memory map work; delivery happens after it is
/// released, through each session's own outbound queue.
pub struct Registry {
    directory: Mutex<Directory>,
    next_session_id: AtomicU64,
}

#[derive(Default)]
struct Directory {
    by_name: HashMap<String, Arc<SessionHandle>>,
    names: HashMap<SessionId, String>,
    // Suffix for the next generated placeholder name.
    next_default: u64,
    // Set by `close_all`; sessions registering afterwards start closed.
    closed: bool,
}

impl Directory {
    fn is_available_to(&self, name: &str, session: SessionId) -> bool {
        match self.by_name.get(name) {
            Some(holder) => holder.id() == session,
            None => true,
        }
    }

    fn insert(&mut self, name: String, handle: Arc<SessionHandle>) {
        self.names.insert(handle.id(), name.clone());
        self.by_name.insert(name, handle);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            directory: Mutex::new(Directory {
                next_default: 1,
                ..Directory::default()
            }),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a freshly accepted session under a generated `user<N>` name.
    ///
    /// Generated names skip anything already claimed, so a user who logged in
    /// as `user7` never collides with the seventh anonymous connection.
    /// After `close_all` the handle is closed on arrival.
    pub async fn register(&self, handle: Arc<SessionHandle>) -> String {
        let mut directory = self.directory.lock().await;
        if directory.closed {
            handle.close();
        }

        let username = loop {
            let candidate = format!("{DEFAULT_USERNAME_PREFIX}{}", directory.next_default);
            directory.next_default += 1;
            if !directory.by_name.contains_key(&candidate) {
                break candidate;
            }
        };

        directory.insert(username.clone(), handle);
        username
    }

    /// `true` if no session currently holds `name`.
    pub async fn is_username_available(&self, name: &str) -> bool {
        !self.directory.lock().await.by_name.contains_key(name)
    }

    /// Atomically gives `name` to `session` if nobody else holds it.
    ///
    /// The session's previous name is released in the same critical section.
    /// Claiming a name the session already holds succeeds.
    pub async fn try_claim(&self, session: &Arc<SessionHandle>, name: &str) -> bool {
        let mut directory = self.directory.lock().await;

        if !directory.is_available_to(name, session.id()) {
            return false;
        }

        if let Some(previous) = directory.names.remove(&session.id()) {
            directory.by_name.remove(&previous);
        }
        directory.insert(name.to_string(), Arc::clone(session));
        true
    }

    /// Drops the session's entry. Returns the name it held, or `None` if it was
    /// already gone.
    pub async fn remove(&self, session: SessionId) -> Option<String> {
        let mut directory = self.directory.lock().await;
        let name = directory.names.remove(&session)?;
        directory.by_name.remove(&name);
        Some(name)
    }

    pub async fn username_of(&self, session: SessionId) -> Option<String> {
        self.directory.lock().await.names.get(&session).cloned()
    }

    /// Snapshot of every registered name, sorted.
    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .directory
            .lock()
            .await
            .by_name
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    pub async fn len(&self) -> usize {
        self.directory.lock().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delivers `line` to every session except `sender`; returns how many
    /// sessions accepted it.
    pub async fn forward_to_all_except(&self, sender: SessionId, line: &str) -> usize {
        let recipients: Vec<Arc<SessionHandle>> = {
            let directory = self.directory.lock().await;
            directory
                .by_name
                .values()
                .filter(|handle| handle.id() != sender)
                .cloned()
                .collect()
        };

        let delivered = recipients
            .iter()
            .filter(|handle| handle.send(line))
            .count();
        debug!(sender, recipients = recipients.len(), delivered, "broadcast line");
        delivered
    }

    /// Delivers `line` to the session holding `target`. `false` if no such
    /// session exists or it has already closed.
    pub async fn forward_to_one(&self, target: &str, line: &str) -> bool {
        let recipient = self.directory.lock().await.by_name.get(target).cloned();
        match recipient {
            Some(handle) => handle.send(line),
            None => false,
        }
    }

    /// Closes every registered session, and every session registered from now
    /// on. Each session deregisters itself as its read loop winds down.
    /// Returns how many sessions this call closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Arc<SessionHandle>> = {
            let mut directory = self.directory.lock().await;
            directory.closed = true;
            directory.by_name.values().cloned().collect()
        };
        sessions.iter().filter(|handle| handle.close()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::sync::mpsc;

    use super::*;

    fn session(
        registry: &Registry,
    ) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle::new(registry.next_session_id(), None, tx));
        (handle, rx)
    }

    #[tokio::test]
    async fn placeholder_names_skip_claimed_ones() {
        let registry = Registry::new();
        let (first, _first_rx) = session(&registry);
        assert_eq!(registry.register(Arc::clone(&first)).await, "user1");
        assert!(registry.try_claim(&first, "user2").await);

        let (second, _second_rx) = session(&registry);
        assert_eq!(registry.register(second).await, "user3");
        assert_eq!(registry.usernames().await, vec!["user2", "user3"]);
    }

    #[tokio::test]
    async fn claim_replaces_previous_name() {
        let registry = Registry::new();
        let (alice, _rx) = session(&registry);
        let placeholder = registry.register(Arc::clone(&alice)).await;

        assert!(registry.try_claim(&alice, "alice").await);
        assert!(registry.is_username_available(&placeholder).await);
        assert!(!registry.is_username_available("alice").await);
        assert!(registry.try_claim(&alice, "alice").await, "own name stays claimable");
        assert_eq!(registry.username_of(alice.id()).await.as_deref(), Some("alice"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn claim_rejects_names_held_by_others() {
        let registry = Registry::new();
        let (alice, _alice_rx) = session(&registry);
        let (bob, _bob_rx) = session(&registry);
        registry.register(Arc::clone(&alice)).await;
        let bob_placeholder = registry.register(Arc::clone(&bob)).await;

        assert!(registry.try_claim(&alice, "alice").await);
        assert!(!registry.try_claim(&bob, "alice").await);
        assert_eq!(
            registry.username_of(bob.id()).await,
            Some(bob_placeholder),
            "a failed claim keeps the old name"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_claim_wins() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();

        for _ in 0..16 {
            let (handle, rx) = session(&registry);
            registry.register(Arc::clone(&handle)).await;
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.try_claim(&handle, "alice").await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.expect("claim task") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 16);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new();
        let (handle, _rx) = session(&registry);
        let name = registry.register(Arc::clone(&handle)).await;

        assert_eq!(registry.remove(handle.id()).await, Some(name.clone()));
        assert_eq!(registry.remove(handle.id()).await, None);
        assert!(registry.is_username_available(&name).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let registry = Registry::new();
        let (sender, mut sender_rx) = session(&registry);
        registry.register(Arc::clone(&sender)).await;

        let mut others = Vec::new();
        for _ in 0..3 {
            let (handle, rx) = session(&registry);
            registry.register(Arc::clone(&handle)).await;
            others.push((handle, rx));
        }

        let delivered = registry
            .forward_to_all_except(sender.id(), "msg user1 hi")
            .await;
        assert_eq!(delivered, 3);

        for (_, rx) in &mut others {
            assert_eq!(rx.try_recv().ok().as_deref(), Some("msg user1 hi"));
        }
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_delivery_reaches_only_the_target() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = session(&registry);
        let (bob, mut bob_rx) = session(&registry);
        registry.register(Arc::clone(&alice)).await;
        registry.register(Arc::clone(&bob)).await;
        assert!(registry.try_claim(&bob, "bob").await);

        assert!(registry.forward_to_one("bob", "privmsg alice psst").await);
        assert!(!registry.forward_to_one("carol", "privmsg alice psst").await);
        assert_eq!(bob_rx.try_recv().ok().as_deref(), Some("privmsg alice psst"));
        assert!(bob_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_all_closes_each_session_once() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        let mut names = HashSet::new();
        for _ in 0..3 {
            let (handle, rx) = session(&registry);
            names.insert(registry.register(Arc::clone(&handle)).await);
            handles.push((handle, rx));
        }

        assert_eq!(names.len(), 3);
        assert_eq!(registry.close_all().await, 3);
        assert_eq!(registry.close_all().await, 0);
        assert!(handles.iter().all(|(handle, _)| handle.is_closed()));
    }

    #[tokio::test]
    async fn sessions_registered_after_close_all_start_closed() {
        let registry = Registry::new();
        assert_eq!(registry.close_all().await, 0);

        let (late, _rx) = session(&registry);
        registry.register(Arc::clone(&late)).await;
        assert!(late.is_closed());
        assert!(!late.send("msgok 0"));
    }
}
