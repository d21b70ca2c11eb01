//! Duplex text-frame streams the hub can serve.
//!
//! A [`Transport`] is anything that yields inbound text frames and accepts
//! outbound ones. The hub serves WebSocket peers through [`WsTransport`];
//! [`channel_pair`] builds an in-process transport for local clients.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, Stream};
use tokio::sync::mpsc;

use crate::{
    error::{Result, TransportError},
    message::{ClientFrame, ServerEvent},
};

pub trait Transport:
    Stream<Item = Result<String, TransportError>>
    + Sink<String, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<String, TransportError>>
        + Sink<String, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

/// Text-frame view of an upgraded WebSocket.
///
/// Ping, pong and binary frames are skipped; a close frame ends the stream.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Stream for WsTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.socket).poll_next(cx)) {
                Some(Ok(WsMessage::Text(text))) => return Poll::Ready(Some(Ok(text))),
                Some(Ok(WsMessage::Close(_))) | None => return Poll::Ready(None),
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    return Poll::Ready(Some(Err(TransportError::WebSocket(error))));
                }
            }
        }
    }
}

impl Sink<String> for WsTransport {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.socket)
            .poll_ready(cx)
            .map_err(TransportError::from)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        Pin::new(&mut self.socket)
            .start_send(WsMessage::Text(item))
            .map_err(TransportError::from)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.socket)
            .poll_flush(cx)
            .map_err(TransportError::from)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.socket)
            .poll_close(cx)
            .map_err(TransportError::from)
    }
}

/// Hub-side half of an in-process connection.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

/// Client-side half of an in-process connection.
pub struct LocalPeer {
    to_hub: mpsc::UnboundedSender<String>,
    from_hub: mpsc::UnboundedReceiver<String>,
}

pub fn channel_pair() -> (ChannelTransport, LocalPeer) {
    let (to_hub, inbound) = mpsc::unbounded_channel();
    let (outbound, from_hub) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            inbound,
            outbound: Some(outbound),
        },
        LocalPeer { to_hub, from_hub },
    )
}

impl Stream for ChannelTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<String> for ChannelTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match &self.outbound {
            Some(outbound) if !outbound.is_closed() => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(TransportError::Closed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(item)
            .map_err(|_| TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.outbound.take();
        Poll::Ready(Ok(()))
    }
}

impl LocalPeer {
    pub fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)?;
        self.send_raw(text)
    }

    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_hub
            .send(text.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Next event from the hub, or `None` once the hub closed the stream.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        match self.from_hub.recv().await {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn channel_pair_carries_frames_both_ways() {
        let (mut transport, mut peer) = channel_pair();

        peer.send(&ClientFrame::Broadcast {
            payload: json!("hello"),
        })
        .unwrap();
        let inbound = transport.next().await.expect("frame").expect("ok frame");
        assert_eq!(inbound, r#"{"type":"broadcast","payload":"hello"}"#);

        transport
            .send(r#"{"type":"welcome","id":0}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            peer.recv().await.unwrap(),
            Some(ServerEvent::Welcome { id: 0 })
        );
    }

    #[tokio::test]
    async fn closing_transport_ends_peer_stream() {
        let (mut transport, mut peer) = channel_pair();
        transport.close().await.unwrap();

        assert_eq!(peer.recv().await.unwrap(), None);
        assert!(matches!(
            transport.send("late".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_peer_ends_inbound_stream() {
        let (mut transport, peer) = channel_pair();
        drop(peer);
        assert!(transport.next().await.is_none());
    }
}
