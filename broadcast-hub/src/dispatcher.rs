use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    error::{HubError, Result},
    message::{ClientId, Message, ServerEvent},
    registry::{ConnectionHandle, Registry},
};

/// Delivers events to one, some or all registered clients.
///
/// Delivery only enqueues onto each client's own outbound queue, so a slow
/// or broken client never delays its siblings. Clients whose queue rejects
/// an event are evicted after the fan-out completes.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends `message` to every registered client, the sender included.
    /// Returns the number of deliveries that were initiated.
    pub async fn broadcast_all(&self, message: Message) -> usize {
        let event = ServerEvent::Message(message);
        self.fan_out(|handle| Some(handle.send(event.clone()))).await
    }

    pub async fn unicast(&self, id: ClientId, message: Message) -> Result<()> {
        self.send_event(id, ServerEvent::Message(message)).await
    }

    /// Tells every other client that `id` joined. The joining client already
    /// received its `welcome` at admission.
    pub async fn notify_join(&self, id: ClientId) -> usize {
        let delivered = self
            .fan_out(|handle| (handle.id() != id).then(|| handle.send_new_client_notice(id)))
            .await;
        debug!(client = id, delivered, "join notice sent");
        delivered
    }

    pub async fn notify_leave(&self, id: ClientId) -> usize {
        self.fan_out(|handle| Some(handle.send(ServerEvent::ClientLeft { id })))
            .await
    }

    /// Removes `id` from the registry and, if it was still registered,
    /// notifies the remaining clients.
    pub async fn disconnect(&self, id: ClientId) {
        self.evict(vec![id]).await;
    }

    pub(crate) async fn send_event(&self, id: ClientId, event: ServerEvent) -> Result<()> {
        let Some(handle) = self.registry.lookup(id).await else {
            debug!(client = id, "recipient not found");
            return Err(HubError::RecipientNotFound(id));
        };
        if let Err(error) = handle.send(event) {
            warn!(client = id, %error, "failed to deliver to client");
            self.evict(vec![id]).await;
            return Err(error);
        }
        Ok(())
    }

    async fn fan_out<F>(&self, mut deliver: F) -> usize
    where
        F: FnMut(&ConnectionHandle) -> Option<Result<()>>,
    {
        let (delivered, failed) = self.enqueue_all(&mut deliver).await;
        self.evict(failed).await;
        delivered
    }

    /// Runs `deliver` against every registered client. `None` skips a client.
    async fn enqueue_all<F>(&self, deliver: &mut F) -> (usize, Vec<ClientId>)
    where
        F: FnMut(&ConnectionHandle) -> Option<Result<()>>,
    {
        let mut delivered = 0;
        let mut failed = Vec::new();
        self.registry
            .for_each(|handle| match deliver(handle) {
                Some(Ok(())) => delivered += 1,
                Some(Err(error)) => {
                    warn!(client = handle.id(), %error, "failed to deliver to client");
                    failed.push(handle.id());
                }
                None => {}
            })
            .await;
        (delivered, failed)
    }

    /// Deregisters every id in `departed`, announcing each departure.
    /// Clients that fail to take a departure notice are evicted in turn.
    async fn evict(&self, mut departed: Vec<ClientId>) {
        while let Some(id) = departed.pop() {
            if self.registry.remove(id).await.is_none() {
                continue;
            }
            info!(client = id, "client evicted");
            let (_, failed) = self
                .enqueue_all(&mut |handle: &ConnectionHandle| {
                    Some(handle.send(ServerEvent::ClientLeft { id }))
                })
                .await;
            departed.extend(failed);
        }
    }
}
