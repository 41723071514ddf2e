//! Screenlink - RPC dispatch and service discovery for point-to-point services.
//!
//! Services talk over one of two wire transports, picked from the scheme of
//! a connection URL (`unix://` for a local socket, `tcp+tv://` or `tv+tcp://`
//! for TCP). Every service reuses the same generic client and server
//! dispatch, and peers find each other's services through a registry that
//! maps a session id (comId) to service locations.
//!
//! # Example
//!
//! ```rust,ignore
//! use screenlink::{DiscoveryService, RegistrationClient, ServiceType};
//!
//! #[tokio::main]
//! async fn main() -> screenlink::Result<()> {
//!     let mut registry = DiscoveryService::new("1.0");
//!     let location = registry.start("tcp+tv://127.0.0.1").await?;
//!
//!     let mut client = RegistrationClient::new();
//!     client.start(&location.to_string())?;
//!
//!     client
//!         .register_service("session-1", ServiceType::ChatIn, "unix:///tmp/chat")
//!         .await
//!         .ok();
//!     let found = client.discover("session-1").await;
//!     println!("{:?}", found);
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod service;
pub mod services;
pub mod status;
pub mod transport;

pub use address::{select_transport, AddressParseError, ConnectionAddress, TransportKind};
pub use config::{ServiceConfig, TransportConfig};
pub use dispatch::{ClientCall, MethodKind, Responder, RpcMethod, ServiceClient, ServiceServer};
pub use error::{Result, ScreenlinkError};
pub use service::{ServiceInformation, ServiceType};
pub use services::{
    AccessControlOutClient, AccessControlOutServer, ChatInClient, ChatInServer,
    DiscoveredServices, DiscoveryService, DiscoveryTable, RegistrationClient, RegistrationServer,
};
pub use status::{CallFailure, CallResult, CallState, CallStatus, FailureKind};
pub use transport::{connect_channel, serve, ClientChannel, InboundDispatch, ServerHandle};
