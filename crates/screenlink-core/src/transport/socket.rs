//! Raw TCP transport (`tcp+tv://`, `tv+tcp://`).
//!
//! An empty host means the loopback interface. A server bound without a port
//! gets one from the OS and reports it through its effective location.

use super::TransportError;
use crate::address::ConnectionAddress;
use crate::error::{Result, ScreenlinkError};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tracing::debug;

const LOOPBACK: &str = "127.0.0.1";

fn host(address: &ConnectionAddress) -> &str {
    if address.host().is_empty() {
        LOOPBACK
    } else {
        address.host()
    }
}

/// Resolve the address and connect to the first endpoint that accepts.
pub async fn connect(
    address: &ConnectionAddress,
) -> std::result::Result<TcpStream, TransportError> {
    if address.port() == 0 {
        return Err(TransportError::connect(address, "no port given"));
    }

    let endpoints = lookup_host((host(address), address.port()))
        .await
        .map_err(|e| TransportError::connect(address, e))?;

    let mut last_error = None;
    for endpoint in endpoints {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                // Calls are small request/reply exchanges.
                let _ = stream.set_nodelay(true);
                debug!("TCP channel connected to {}", endpoint);
                return Ok(stream);
            }
            Err(e) => {
                debug!("TCP connect to {} failed: {}", endpoint, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => TransportError::connect(address, e),
        None => TransportError::connect(address, "host did not resolve to any address"),
    })
}

/// Bind a listener. Returns it with the effective location.
pub async fn bind(address: &ConnectionAddress) -> Result<(TcpListener, ConnectionAddress)> {
    let listener = TcpListener::bind((host(address), address.port()))
        .await
        .map_err(|e| ScreenlinkError::bind(address.to_string(), e))?;
    let local = listener.local_addr()?;
    Ok((listener, address.with_port(local.port())))
}
