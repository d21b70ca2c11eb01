//! Real-time broadcast hub over WebSockets.
//!
//! Clients connect to a single upgrade route, receive a unique identity and
//! exchange JSON frames that the hub fans out to one or all connected
//! clients. Each module owns one concern:
//!
//! - [`registry`] admits and removes clients, assigns identities and
//!   enforces the capacity limit.
//! - [`connection`] runs the read/write loop for a single client.
//! - [`dispatcher`] fans events out to registered clients without letting
//!   one slow client hold up the others.
//! - [`hub`] wires the registry and dispatcher behind an axum router and
//!   handles graceful shutdown.
//! - [`transport`] adapts WebSockets (and in-process channels) to the text
//!   frame streams the core works with.
//! - [`message`] defines the JSON wire protocol.
//! - [`config`] and [`cli`] describe how the hub is configured.
//!
//! Integration tests drive the registry and dispatcher through in-process
//! transports and the full hub through real WebSocket clients.

pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod transport;

pub use config::HubConfig;
pub use error::{HubError, TransportError};
pub use hub::Hub;
