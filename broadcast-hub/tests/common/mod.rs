#![allow(dead_code)]

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use anyhow::{Context as _, Result, anyhow};
use broadcast_hub::{
    HubConfig, TransportError,
    dispatcher::Dispatcher,
    hub::serve_transport,
    message::{ClientId, Message, ServerEvent},
    registry::Registry,
    transport::{LocalPeer, channel_pair},
};
use futures::{Sink, Stream};
use tokio::{task::JoinHandle, time::timeout};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(1);
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

pub fn registry(config: HubConfig) -> Arc<Registry> {
    Arc::new(Registry::new(&config))
}

pub fn dispatcher(config: HubConfig) -> Dispatcher {
    Dispatcher::new(registry(config))
}

pub struct Client {
    pub id: ClientId,
    pub peer: LocalPeer,
    pub task: JoinHandle<()>,
}

/// Connects an in-process client and waits for its welcome.
pub async fn connect(dispatcher: &Dispatcher) -> Result<Client> {
    let (transport, mut peer) = channel_pair();
    let task = tokio::spawn(serve_transport(transport, dispatcher.clone()));
    match next_event(&mut peer).await? {
        Some(ServerEvent::Welcome { id }) => Ok(Client { id, peer, task }),
        other => Err(anyhow!("expected welcome, got {other:?}")),
    }
}

pub async fn next_event(peer: &mut LocalPeer) -> Result<Option<ServerEvent>> {
    let event = timeout(EVENT_TIMEOUT, peer.recv())
        .await
        .context("timed out waiting for hub event")??;
    Ok(event)
}

/// Reads events until `pred` matches, skipping everything else.
pub async fn expect_event<F>(peer: &mut LocalPeer, mut pred: F) -> Result<ServerEvent>
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        match next_event(peer).await? {
            Some(event) if pred(&event) => return Ok(event),
            Some(_) => continue,
            None => return Err(anyhow!("stream closed before expected event")),
        }
    }
}

/// Collects every `message` event that arrives before the stream goes quiet.
pub async fn drain_messages(peer: &mut LocalPeer) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(Ok(Some(event))) = timeout(QUIET_PERIOD, peer.recv()).await {
        if let ServerEvent::Message(message) = event {
            messages.push(message);
        }
    }
    messages
}

pub async fn wait_until_removed(registry: &Registry, id: ClientId) -> Result<()> {
    timeout(EVENT_TIMEOUT, async {
        while registry.lookup(id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .with_context(|| format!("client {id} was never removed"))
}

/// A stream whose peer has gone away: nothing is ever read and every write fails.
pub struct BrokenTransport;

impl Stream for BrokenTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Pending
    }
}

impl Sink<String> for BrokenTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(TransportError::Closed))
    }

    fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
        Err(TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(TransportError::Closed))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// A peer that never reads: every write waits for a readiness that never comes.
pub struct StalledTransport;

impl Stream for StalledTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Pending
    }
}

impl Sink<String> for StalledTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
