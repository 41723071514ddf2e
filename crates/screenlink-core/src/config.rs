//! Centralized configuration for screenlink.
//!
//! Wire constants, transport limits and retry timings live here so both
//! transports and both sides of a call agree on them.

use std::time::Duration;

/// Transport-level configuration shared by the TCP and unix socket transports.
pub struct TransportConfig;

impl TransportConfig {
    /// Sent before every request envelope.
    pub const MAGIC_PREAMBLE: u32 = 0xFF00_5456;
    /// Opens every envelope, request or reply.
    pub const MAGIC_ENVELOPE: u32 = 0xFF54_5600;

    /// Upper bound for a single header or payload frame.
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

    // Server limits
    pub const MAX_CONNECTIONS: usize = 64;

    // Client timings
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CALL_RETRY_ATTEMPTS: u32 = 10;
    pub const CALL_RETRY_DELAY: Duration = Duration::from_millis(500);
}

/// Service-level configuration.
pub struct ServiceConfig;

impl ServiceConfig {
    /// Communication protocol version answered by `ExchangeVersion`.
    pub const COMMUNICATION_VERSION: &'static str = "1.0";
}
