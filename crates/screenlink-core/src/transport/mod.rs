//! Wire transports.
//!
//! A transport moves opaque [`WireRequest`]s from a client channel to a
//! server and [`WireReply`]s back. Both supported transports share the
//! envelope framing in [`protocol`] and differ only in the byte stream:
//!
//! - **Embedded** (`unix://`): unix domain socket at the URL path.
//! - **RawSocket** (`tcp+tv://`, `tv+tcp://`): TCP to `host:port`.
//!
//! [`connect_channel`] and [`serve`] are the factory entry points. They
//! parse the URL and select the transport before any network activity, so
//! address problems surface as setup errors rather than per-call failures.

pub mod channel;
#[cfg(unix)]
pub mod embedded;
pub mod protocol;
pub mod server;
pub mod socket;

pub use channel::StreamChannel;
pub use protocol::{EnvelopeHeader, ReplyEnvelope, WireStatus};
pub use server::ServerHandle;

use crate::address::{ConnectionAddress, TransportKind};
use crate::error::{Result, ScreenlinkError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A call as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    /// Out-of-band session id. `None` for methods that carry none.
    pub com_id: Option<String>,
    pub function_id: u32,
    pub payload: Vec<u8>,
}

/// A reply as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireReply {
    pub status: WireStatus,
    pub payload: Vec<u8>,
}

impl WireReply {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: WireStatus::ok(),
            payload,
        }
    }

    pub fn failed(failure: &crate::status::CallFailure) -> Self {
        Self {
            status: WireStatus::failed(failure),
            payload: Vec::new(),
        }
    }
}

/// Errors raised while moving bytes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {location}: {message}")]
    Connect { location: String, message: String },

    #[error("failed to send request: {0}")]
    Send(#[source] std::io::Error),

    /// The connection ended after the request was written, before its reply.
    #[error("connection closed by peer")]
    Closed,

    #[error("stream ended inside {0}")]
    Truncated(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("envelope header error: {0}")]
    Header(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the request certainly did not reach a handler, so a retry on
    /// a fresh connection is safe.
    ///
    /// Only failures before the request was fully written qualify. Once it is
    /// on the wire the handler may have run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect { .. } | TransportError::Send(_))
    }

    pub(crate) fn connect(location: &ConnectionAddress, err: impl std::fmt::Display) -> Self {
        TransportError::Connect {
            location: location.to_string(),
            message: err.to_string(),
        }
    }
}

/// Client side of a transport.
#[async_trait::async_trait]
pub trait ClientChannel: Send + Sync {
    /// Send one request and wait for its reply.
    async fn call(&self, request: WireRequest) -> std::result::Result<WireReply, TransportError>;

    /// Where this channel sends its calls.
    fn destination(&self) -> &ConnectionAddress;
}

/// Server side entry point: turns an inbound request into a reply.
#[async_trait::async_trait]
pub trait InboundDispatch: Send + Sync + 'static {
    async fn dispatch(&self, request: WireRequest) -> WireReply;
}

fn resolve(url: &str) -> Result<ConnectionAddress> {
    let address = ConnectionAddress::parse(url)?;
    match address.transport() {
        TransportKind::RawSocket => Ok(address),
        #[cfg(unix)]
        TransportKind::Embedded => Ok(address),
        _ => Err(ScreenlinkError::UnsupportedTransport {
            scheme: address.scheme().to_string(),
            url: url.to_string(),
        }),
    }
}

/// Create a client channel for `url`.
///
/// The channel connects lazily on its first call.
pub fn connect_channel(url: &str) -> Result<Arc<dyn ClientChannel>> {
    let address = resolve(url)?;
    debug!("Creating {} channel to {}", address.transport(), address);
    Ok(Arc::new(StreamChannel::new(address)))
}

/// Bind a server at `url` and start delivering inbound calls to `dispatch`.
pub async fn serve(url: &str, dispatch: Arc<dyn InboundDispatch>) -> Result<ServerHandle> {
    let address = resolve(url)?;
    server::start(address, dispatch).await
}
