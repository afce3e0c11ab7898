//! Live session registry.
//!
//! Sessions are keyed by connection id. A second map indexes them by
//! identity so lookups and evictions do not scan every connection.

use crate::error::ServerError;
use crate::server::ServerStats;
use crate::session::{Session, SessionSettings};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpStream;
use uuid::Uuid;

/// Invoked once per closed session with its identity.
pub type CloseCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Which sessions are closed when an identity is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Close every other live session holding the identity.
    #[default]
    AllMatching,
    /// Inspect one arbitrary other live session and close it only if it
    /// holds the identity. Several sessions may end up sharing an identity.
    FirstInspected,
}

/// Server-wide set of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
    identities: DashMap<String, Uuid>,
    policy: EvictionPolicy,
    on_close: RwLock<Option<CloseCallback>>,
    stats: Arc<ServerStats>,
}

impl SessionRegistry {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self::with_stats(policy, Arc::new(ServerStats::default()))
    }

    pub fn with_stats(policy: EvictionPolicy, stats: Arc<ServerStats>) -> Self {
        Self {
            sessions: DashMap::new(),
            identities: DashMap::new(),
            policy,
            on_close: RwLock::new(None),
            stats,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Sets the callback invoked after each session closes.
    pub fn set_on_close(&self, callback: impl Fn(Option<&str>) + Send + Sync + 'static) {
        *self.on_close.write() = Some(Arc::new(callback));
    }

    /// Wraps an accepted stream in a session and registers it.
    pub fn open(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        settings: SessionSettings,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(
            stream,
            remote_addr,
            settings,
            Arc::downgrade(self),
        ));
        self.sessions.insert(session.id(), session.clone());
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Returns a snapshot of the live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Finds the live session holding `identity`.
    pub fn find(&self, identity: &str) -> Result<Arc<Session>, ServerError> {
        let indexed = self.identities.get(identity).map(|entry| *entry.value());
        if let Some(session) = indexed.and_then(|id| self.get(&id)) {
            if session.identity().as_deref() == Some(identity) {
                return Ok(session);
            }
        }

        // The index only tracks the latest holder, older ones may remain
        // under `FirstInspected`.
        self.sessions
            .iter()
            .find(|entry| entry.value().identity().as_deref() == Some(identity))
            .map(|entry| entry.value().clone())
            .ok_or(ServerError::DeviceOffline)
    }

    /// Closes every live session.
    pub fn close_all(&self) {
        for session in self.sessions() {
            session.close();
        }
    }

    /// Records `session` as the holder of `identity` and evicts conflicting
    /// sessions. Returns the number of evicted sessions.
    pub(crate) fn assign(
        &self,
        session: &Session,
        previous: Option<&str>,
        identity: &str,
    ) -> usize {
        let id = session.id();

        if let Some(previous) = previous.filter(|p| *p != identity) {
            self.identities.remove_if(previous, |_, holder| *holder == id);
        }
        if session.is_closed() {
            return 0;
        }

        let victims: Vec<Arc<Session>> = match self.policy {
            EvictionPolicy::AllMatching => {
                let displaced = self.identities.insert(identity.to_string(), id);
                displaced
                    .filter(|holder| *holder != id)
                    .and_then(|holder| self.get(&holder))
                    .into_iter()
                    .collect()
            }
            EvictionPolicy::FirstInspected => {
                let inspected = self
                    .sessions
                    .iter()
                    .find(|entry| *entry.key() != id)
                    .map(|entry| entry.value().clone());
                self.identities.insert(identity.to_string(), id);
                inspected.into_iter().collect()
            }
        };

        let mut evicted = 0;
        for victim in victims {
            if victim.id() == id
                || victim.is_closed()
                || victim.identity().as_deref() != Some(identity)
            {
                continue;
            }
            tracing::warn!(
                "Evicting session {} ({}): identity '{}' reassigned to {}",
                victim.id(),
                victim.remote_addr(),
                identity,
                id
            );
            victim.close();
            evicted += 1;
        }

        // A close that raced with this assignment may have missed the entry.
        if session.is_closed() {
            self.identities.remove_if(identity, |_, holder| *holder == id);
        }

        evicted
    }

    /// Drops a closing session from both maps.
    pub(crate) fn remove(&self, session: &Session) {
        let id = session.id();
        if self.sessions.remove(&id).is_none() {
            return;
        }
        if let Some(identity) = session.identity() {
            self.identities.remove_if(&identity, |_, holder| *holder == id);
        }
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notify_closed(&self, identity: Option<&str>) {
        let callback = self.on_close.read().clone();
        if let Some(callback) = callback {
            callback(identity);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("identities", &self.identities.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connect;

    fn live_holders(registry: &SessionRegistry, identity: &str) -> usize {
        registry
            .sessions()
            .iter()
            .filter(|s| s.identity().as_deref() == Some(identity))
            .count()
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::AllMatching));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (b, _cb) = connect(&registry, SessionSettings::default()).await;

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().connections_active.load(Ordering::Relaxed), 2);
        assert!(registry.get(&a.id()).is_some());

        a.close();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&a.id()).is_none());
        assert!(registry.get(&b.id()).is_some());
        assert_eq!(registry.stats().connections_active.load(Ordering::Relaxed), 1);
        assert_eq!(registry.stats().connections_closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_find() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::AllMatching));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (_b, _cb) = connect(&registry, SessionSettings::default()).await;

        assert!(matches!(
            registry.find("meter-1"),
            Err(ServerError::DeviceOffline)
        ));

        a.set_identity("meter-1");
        assert_eq!(registry.find("meter-1").unwrap().id(), a.id());

        a.close();
        assert!(matches!(
            registry.find("meter-1"),
            Err(ServerError::DeviceOffline)
        ));
    }

    #[tokio::test]
    async fn test_identity_change_releases_old_identity() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::AllMatching));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;

        a.set_identity("old");
        a.set_identity("new");

        assert!(registry.find("old").is_err());
        assert_eq!(registry.find("new").unwrap().id(), a.id());
    }

    #[tokio::test]
    async fn test_all_matching_evicts_previous_holder() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::AllMatching));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (b, _cb) = connect(&registry, SessionSettings::default()).await;
        let (c, _cc) = connect(&registry, SessionSettings::default()).await;
        c.set_identity("other");

        assert_eq!(a.set_identity("X"), 0);
        assert_eq!(b.set_identity("X"), 1);

        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(!c.is_closed());
        assert_eq!(live_holders(&registry, "X"), 1);
        assert_eq!(registry.find("X").unwrap().id(), b.id());
    }

    #[tokio::test]
    async fn test_reassigning_own_identity_keeps_session() {
        for policy in [EvictionPolicy::AllMatching, EvictionPolicy::FirstInspected] {
            let registry = Arc::new(SessionRegistry::new(policy));
            let (a, _ca) = connect(&registry, SessionSettings::default()).await;

            a.set_identity("X");
            assert_eq!(a.set_identity("X"), 0);
            assert!(!a.is_closed());
            assert_eq!(registry.find("X").unwrap().id(), a.id());
        }
    }

    #[tokio::test]
    async fn test_first_inspected_evicts_single_other_holder() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::FirstInspected));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (b, _cb) = connect(&registry, SessionSettings::default()).await;

        a.set_identity("X");
        assert_eq!(b.set_identity("X"), 1);

        assert!(a.is_closed());
        assert_eq!(live_holders(&registry, "X"), 1);
        assert_eq!(registry.find("X").unwrap().id(), b.id());
    }

    #[tokio::test]
    async fn test_first_inspected_ignores_other_identities() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::FirstInspected));
        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (b, _cb) = connect(&registry, SessionSettings::default()).await;

        a.set_identity("Y");
        assert_eq!(b.set_identity("X"), 0);
        assert!(!a.is_closed());
        assert_eq!(registry.len(), 2);
    }

    /// Opens three sessions and returns them in the order `assign` inspects
    /// them, along with their client ends.
    async fn three_in_scan_order(
        registry: &Arc<SessionRegistry>,
    ) -> (Vec<Arc<Session>>, Vec<tokio::net::TcpStream>) {
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (_session, client) = connect(registry, SessionSettings::default()).await;
            clients.push(client);
        }
        (registry.sessions(), clients)
    }

    #[tokio::test]
    async fn test_first_inspected_holder_inspected() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::FirstInspected));
        let (order, _clients) = three_in_scan_order(&registry).await;
        let (assignee, holder, unrelated) = (&order[0], &order[1], &order[2]);

        unrelated.set_identity("unrelated");
        holder.set_identity("X");
        assert_eq!(assignee.set_identity("X"), 1);

        assert!(holder.is_closed());
        assert!(!unrelated.is_closed());
        assert_eq!(live_holders(&registry, "X"), 1);
    }

    #[tokio::test]
    async fn test_first_inspected_non_holder_inspected() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::FirstInspected));
        let (order, _clients) = three_in_scan_order(&registry).await;
        let (assignee, unrelated, holder) = (&order[0], &order[1], &order[2]);

        unrelated.set_identity("unrelated");
        holder.set_identity("X");

        // Only the unrelated session is inspected, so both holders survive
        assert_eq!(assignee.set_identity("X"), 0);
        assert!(!holder.is_closed());
        assert!(!unrelated.is_closed());
        assert_eq!(live_holders(&registry, "X"), 2);
        assert_eq!(registry.find("X").unwrap().id(), assignee.id());

        // Once the newer holder goes, lookup falls back to the older one
        assignee.close();
        assert_eq!(registry.find("X").unwrap().id(), holder.id());

        holder.close();
        assert!(registry.find("X").unwrap_err().is_offline());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = Arc::new(SessionRegistry::new(EvictionPolicy::AllMatching));
        let closed = Arc::new(RwLock::new(Vec::new()));
        {
            let closed = closed.clone();
            registry.set_on_close(move |identity| {
                closed.write().push(identity.map(str::to_string));
            });
        }

        let (a, _ca) = connect(&registry, SessionSettings::default()).await;
        let (b, _cb) = connect(&registry, SessionSettings::default()).await;
        a.set_identity("a");

        registry.close_all();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty());

        let mut closed = closed.read().clone();
        closed.sort();
        assert_eq!(closed, vec![None, Some("a".to_string())]);
    }

    #[test]
    fn test_policy_serde() {
        let policy: EvictionPolicy = serde_yaml::from_str("first_inspected").unwrap();
        assert_eq!(policy, EvictionPolicy::FirstInspected);
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::AllMatching);
    }
}
