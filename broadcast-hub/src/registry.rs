use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, mpsc, watch},
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    config::HubConfig,
    connection::Connection,
    error::{HubError, Result, TransportError},
    message::{ClientId, ServerEvent},
};

/// The registry-owned half of a live connection.
///
/// Cloning a handle is cheap; the [`Dispatcher`](crate::dispatcher::Dispatcher)
/// fans out over cloned snapshots so the registry lock is never held while
/// delivering.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ClientId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queues `event` for this client without waiting.
    ///
    /// A full queue means the client is not keeping up; both that and a
    /// closed queue are reported as a stream failure.
    pub fn send(&self, event: ServerEvent) -> Result<()> {
        self.outbound.try_send(event).map_err(|error| {
            let source = match error {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            };
            HubError::StreamFailure {
                id: self.id,
                source,
            }
        })
    }

    pub fn send_new_client_notice(&self, id: ClientId) -> Result<()> {
        self.send(ServerEvent::NewClient { id })
    }
}

/// A transport refused at admission, handed back so the caller can close it.
#[derive(Debug)]
pub struct Rejected<T> {
    pub transport: T,
    pub error: HubError,
}

/// Authoritative set of connected clients and the only admission gate.
///
/// The live count is always the size of the map; every mutation publishes
/// the new count while the lock is still held.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    max_clients: usize,
    outbound_capacity: usize,
    write_timeout: Duration,
    live: watch::Sender<usize>,
    shutdown: watch::Sender<bool>,
}

struct RegistryInner {
    clients: HashMap<ClientId, ConnectionHandle>,
    next_id: ClientId,
    closed: bool,
}

impl Registry {
    pub fn new(config: &HubConfig) -> Self {
        let (live, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Mutex::new(RegistryInner {
                clients: HashMap::new(),
                next_id: 0,
                closed: false,
            }),
            max_clients: config.max_clients,
            outbound_capacity: config.outbound_capacity.max(1),
            write_timeout: config.write_timeout,
            live,
            shutdown,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Admits `transport` if the hub has room, assigning it a fresh identity.
    ///
    /// The capacity check, id assignment and insertion happen in one critical
    /// section. The new client's queue already holds its `welcome` event.
    pub async fn admit<T>(self: &Arc<Self>, transport: T) -> Result<Connection<T>, Rejected<T>> {
        let mut inner = self.inner.lock().await;

        if let Err(error) = self.check_admission(&inner) {
            return Err(Rejected { transport, error });
        }

        let id = inner.next_id;
        let (outbound, receiver) = mpsc::channel(self.outbound_capacity);
        let handle = ConnectionHandle { id, outbound };
        if let Err(error) = handle.send(ServerEvent::Welcome { id }) {
            return Err(Rejected { transport, error });
        }

        inner.next_id += 1;
        inner.clients.insert(id, handle);
        let live = inner.clients.len();
        self.live.send_replace(live);
        // Subscribe before releasing the lock so a concurrent close() is observed.
        let shutdown = self.shutdown.subscribe();
        drop(inner);

        info!(client = id, live, "client admitted");
        Ok(Connection::new(
            id,
            transport,
            receiver,
            Arc::clone(self),
            shutdown,
            self.write_timeout,
        ))
    }

    /// Reports whether an admission would currently succeed. The answer is
    /// advisory: only [`Registry::admit`] decides.
    pub async fn ensure_capacity(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        self.check_admission(&inner)
    }

    fn check_admission(&self, inner: &RegistryInner) -> Result<()> {
        if inner.closed {
            return Err(HubError::ShuttingDown);
        }
        if inner.clients.len() >= self.max_clients {
            return Err(HubError::AdmissionRejected {
                max_clients: self.max_clients,
            });
        }
        Ok(())
    }

    /// Removes `id` if it is registered. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: ClientId) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock().await;
        let removed = inner.clients.remove(&id)?;
        let live = inner.clients.len();
        self.live.send_replace(live);
        drop(inner);

        debug!(client = id, live, "client deregistered");
        Some(removed)
    }

    pub async fn lookup(&self, id: ClientId) -> Option<ConnectionHandle> {
        self.inner.lock().await.clients.get(&id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().await.clients.values().cloned().collect()
    }

    /// Calls `f` once for every client registered when the call starts.
    ///
    /// Iterates over a snapshot, so `f` may freely call back into the registry.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ConnectionHandle),
    {
        for handle in self.snapshot().await.iter() {
            f(handle);
        }
    }

    pub async fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.inner.lock().await.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops admissions and signals every connection to shut down.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        let live = inner.clients.len();
        drop(inner);

        info!(live, "registry closed, disconnecting clients");
        self.shutdown.send_replace(true);
    }

    /// Waits until every connection has deregistered, up to `grace`.
    /// Returns `false` if clients were still registered when time ran out.
    pub async fn wait_until_empty(&self, grace: Duration) -> bool {
        let mut live = self.live.subscribe();
        timeout(grace, async move {
            live.wait_for(|count| *count == 0).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_clients: usize) -> Arc<Registry> {
        Arc::new(Registry::new(
            &HubConfig::default().with_max_clients(max_clients),
        ))
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let registry = registry(2);
        let a = registry.admit(()).await.expect("first admit");
        let b = registry.admit(()).await.expect("second admit");
        assert_eq!((a.id(), b.id()), (0, 1));

        registry.remove(a.id()).await;
        let c = registry.admit(()).await.expect("admit after removal");
        assert_eq!(c.id(), 2);
        assert_eq!(registry.ids().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn admitted_client_is_welcomed_first() {
        let registry = registry(1);
        let mut connection = registry.admit(()).await.expect("admit");
        assert_eq!(
            connection.next_outbound().await,
            Some(ServerEvent::Welcome { id: 0 })
        );
    }

    #[tokio::test]
    async fn rejection_returns_the_transport() {
        let registry = registry(1);
        let _first = registry.admit("first").await.expect("admit");

        let Err(rejected) = registry.admit("second").await else {
            panic!("second admit should be rejected");
        };
        assert_eq!(rejected.transport, "second");
        assert!(matches!(
            rejected.error,
            HubError::AdmissionRejected { max_clients: 1 }
        ));
        assert!(registry.ensure_capacity().await.is_err());
    }

    #[tokio::test]
    async fn closed_registry_rejects_admission() {
        let registry = registry(4);
        registry.close().await;

        let Err(rejected) = registry.admit(()).await else {
            panic!("closed registry must not admit");
        };
        assert!(matches!(rejected.error, HubError::ShuttingDown));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn for_each_visits_every_client_once() {
        let registry = registry(3);
        let _a = registry.admit(()).await.unwrap();
        let _b = registry.admit(()).await.unwrap();

        let mut seen = Vec::new();
        registry.for_each(|handle| seen.push(handle.id())).await;
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }

    #[tokio::test]
    async fn wait_until_empty_tracks_removals() {
        let registry = registry(1);
        let connection = registry.admit(()).await.unwrap();
        assert!(!registry.wait_until_empty(Duration::from_millis(20)).await);

        registry.remove(connection.id()).await;
        assert!(registry.wait_until_empty(Duration::from_millis(20)).await);
    }
}
