use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    config::HubConfig,
    dispatcher::Dispatcher,
    error::HubError,
    registry::{Registry, Rejected},
    transport::{Transport, WsTransport},
};

pub const STATS_PATH: &str = "/stats";

/// The hub's HTTP front: a WebSocket route feeding the registry plus a
/// small stats route.
pub struct Hub {
    listener: TcpListener,
    config: HubConfig,
    dispatcher: Dispatcher,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubStats {
    pub live: usize,
    pub max_clients: usize,
}

impl Hub {
    pub fn new(listener: TcpListener, config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let registry = Arc::new(Registry::new(&config));
        Ok(Self {
            listener,
            config,
            dispatcher: Dispatcher::new(registry),
        })
    }

    pub async fn bind(config: HubConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self::new(listener, config)?)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.dispatcher.registry())
    }

    /// Handle for sending hub-originated messages.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, get(accept_client))
            .route(STATS_PATH, get(stats))
            .layer(TraceLayer::new_for_http())
            .with_state(self.dispatcher.clone())
    }

    /// Serves clients until `shutdown` resolves, then disconnects everyone
    /// and waits up to the configured grace period for them to deregister.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let registry = self.registry();
        let Hub { listener, config, .. } = self;

        let closing = Arc::clone(&registry);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("hub shutting down");
                closing.close().await;
            })
            .await?;

        if !registry.wait_until_empty(config.shutdown_grace).await {
            let remaining = registry.len().await;
            warn!(
                remaining,
                grace = ?config.shutdown_grace,
                "clients still connected after shutdown grace period"
            );
        }
        info!("hub stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn accept_client(ws: WebSocketUpgrade, State(dispatcher): State<Dispatcher>) -> Response {
    // Full hubs refuse before upgrading; admit() re-checks after the upgrade.
    if let Err(error) = dispatcher.registry().ensure_capacity().await {
        warn!(%error, "refusing connection");
        return (StatusCode::SERVICE_UNAVAILABLE, error.to_string()).into_response();
    }

    ws.on_failed_upgrade(|error| {
        warn!(error = %HubError::UpgradeFailed(error), "connection attempt aborted");
    })
    .on_upgrade(move |socket| serve_socket(socket, dispatcher))
}

async fn serve_socket(socket: WebSocket, dispatcher: Dispatcher) {
    serve_transport(WsTransport::new(socket), dispatcher).await;
}

/// Admits `transport` and serves it until it disconnects. Rejected
/// transports are closed without being registered.
pub async fn serve_transport<T: Transport>(transport: T, dispatcher: Dispatcher) {
    let connection = match dispatcher.registry().admit(transport).await {
        Ok(connection) => connection,
        Err(Rejected {
            mut transport,
            error,
        }) => {
            warn!(%error, "closing rejected connection");
            if let Err(error) = transport.close().await {
                debug!(%error, "failed to close rejected connection");
            }
            return;
        }
    };

    dispatcher.notify_join(connection.id()).await;
    connection.listen(dispatcher).await;
}

async fn stats(State(dispatcher): State<Dispatcher>) -> Json<HubStats> {
    let registry = dispatcher.registry();
    Json(HubStats {
        live: registry.len().await,
        max_clients: registry.max_clients(),
    })
}
