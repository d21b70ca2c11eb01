use std::{fmt, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{
    runtime::Handle,
    select,
    sync::{mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{HubError, TransportError},
    message::{ClientFrame, ClientId, Message, ServerEvent, decode_frame, encode_event},
    registry::Registry,
    transport::Transport,
};

/// One admitted client and the stream it owns.
///
/// Created only by [`Registry::admit`]. [`Connection::listen`] drives the
/// client from `Active` through `Closing` to `Removed`; the registry entry is
/// dropped exactly once on the way out. A connection dropped before `listen`
/// finishes still deregisters and announces its departure.
pub struct Connection<T> {
    id: ClientId,
    transport: T,
    outbound: mpsc::Receiver<ServerEvent>,
    departure: Departure,
    shutdown: watch::Receiver<bool>,
    write_timeout: Duration,
}

/// Deregisters a client when dropped unless the normal exit path already did.
struct Departure {
    id: ClientId,
    registry: Arc<Registry>,
    armed: bool,
}

impl Departure {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Departure {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry));
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { dispatcher.disconnect(id).await });
            }
            Err(_) => warn!(
                client = id,
                "connection dropped outside a runtime, slot not reclaimed"
            ),
        }
    }
}

/// Why a connection left the `Active` state.
#[derive(Debug)]
pub enum Disconnect {
    PeerClosed,
    StreamFailure(TransportError),
    /// The registry dropped the connection's handle.
    Evicted,
    Shutdown,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::PeerClosed => f.write_str("peer closed the stream"),
            Disconnect::StreamFailure(error) => write!(f, "stream failure: {error}"),
            Disconnect::Evicted => f.write_str("evicted by the hub"),
            Disconnect::Shutdown => f.write_str("hub shutting down"),
        }
    }
}

impl<T> Connection<T> {
    pub(crate) fn new(
        id: ClientId,
        transport: T,
        outbound: mpsc::Receiver<ServerEvent>,
        registry: Arc<Registry>,
        shutdown: watch::Receiver<bool>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            transport,
            outbound,
            departure: Departure {
                id,
                registry,
                armed: true,
            },
            shutdown,
            write_timeout,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    #[cfg(test)]
    pub(crate) async fn next_outbound(&mut self) -> Option<ServerEvent> {
        self.outbound.recv().await
    }
}

impl<T: Transport> Connection<T> {
    /// Serves this client until its stream ends, then deregisters it.
    ///
    /// Inbound frames go to `dispatcher`; queued events are written to the
    /// peer in the order they were queued.
    pub async fn listen(self, dispatcher: Dispatcher) -> Disconnect {
        let Connection {
            id,
            transport,
            mut outbound,
            mut departure,
            mut shutdown,
            write_timeout,
        } = self;
        let (mut sink, mut frames) = transport.split();

        let reason = loop {
            select! {
                frame = frames.next() => match frame {
                    Some(Ok(text)) => handle_frame(id, &text, &dispatcher).await,
                    Some(Err(error)) => break Disconnect::StreamFailure(error),
                    None => break Disconnect::PeerClosed,
                },
                event = outbound.recv() => match event {
                    Some(event) => {
                        if let Err(error) = write_event(&mut sink, &event, write_timeout).await {
                            break Disconnect::StreamFailure(error);
                        }
                    }
                    None => break Disconnect::Evicted,
                },
                _ = shutdown.changed() => break Disconnect::Shutdown,
            }
        };

        match &reason {
            Disconnect::StreamFailure(error) => {
                warn!(client = id, %error, "client connection failed")
            }
            _ => info!(client = id, %reason, "client disconnecting"),
        }

        if departure.registry.remove(id).await.is_some() {
            dispatcher.notify_leave(id).await;
        }
        departure.disarm();

        match timeout(write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(client = id, %error, "failed to close client stream cleanly"),
            Err(_) => debug!(client = id, "timed out closing client stream"),
        }
        reason
    }
}

async fn handle_frame(id: ClientId, text: &str, dispatcher: &Dispatcher) {
    let frame = match decode_frame(text) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(client = id, %error, "discarding malformed frame");
            report_error(id, &error, dispatcher).await;
            return;
        }
    };

    match frame {
        ClientFrame::Broadcast { payload } => {
            dispatcher
                .broadcast_all(Message::from_client(id, payload))
                .await;
        }
        ClientFrame::Direct { to, payload } => {
            if let Err(error @ HubError::RecipientNotFound(_)) = dispatcher
                .unicast(to, Message::from_client(id, payload))
                .await
            {
                report_error(id, &error, dispatcher).await;
            }
        }
    }
}

async fn report_error(id: ClientId, error: &HubError, dispatcher: &Dispatcher) {
    let event = ServerEvent::Error {
        message: error.to_string(),
    };
    if let Err(error) = dispatcher.send_event(id, event).await {
        debug!(client = id, %error, "failed to report error to client");
    }
}

async fn write_event<T: Transport>(
    sink: &mut SplitSink<T, String>,
    event: &ServerEvent,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    let text = encode_event(event)?;
    match timeout(write_timeout, sink.send(text)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(write_timeout)),
    }
}
