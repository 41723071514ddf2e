//! Error types for setup-time failures.
//!
//! Per-call failures are never raised through this type; they travel as
//! [`CallFailure`](crate::status::CallFailure) values inside a
//! [`CallResult`](crate::status::CallResult). `ScreenlinkError` covers the
//! conditions that must be caught before a serving loop or client channel
//! exists: bad addresses, unsupported transports and I/O errors while binding.

use thiserror::Error;

/// Main error type for the screenlink library.
#[derive(Debug, Error)]
pub enum ScreenlinkError {
    // Addressing errors
    #[error("Malformed address: {url}")]
    MalformedAddress { url: String },

    #[error("Unsupported transport for scheme '{scheme}' in {url}")]
    UnsupportedTransport { scheme: String, url: String },

    // I/O errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to bind {location}: {message}")]
    Bind { location: String, message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Lifecycle errors
    #[error("Server already started at {location}")]
    AlreadyStarted { location: String },
}

/// Result type alias for screenlink setup operations.
pub type Result<T> = std::result::Result<T, ScreenlinkError>;

impl From<std::io::Error> for ScreenlinkError {
    fn from(err: std::io::Error) -> Self {
        ScreenlinkError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ScreenlinkError {
    /// Create a bind error for a server location.
    pub fn bind(location: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ScreenlinkError::Bind {
            location: location.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScreenlinkError::MalformedAddress {
            url: "unix:///tmp//".into(),
        };
        assert_eq!(err.to_string(), "Malformed address: unix:///tmp//");

        let err = ScreenlinkError::UnsupportedTransport {
            scheme: "http".into(),
            url: "http://localhost:80".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported transport for scheme 'http' in http://localhost:80"
        );
    }

    #[test]
    fn test_bind_error_names_location() {
        let err = ScreenlinkError::bind("unix:///tmp/a.sock", "address in use");
        assert_eq!(
            err.to_string(),
            "Failed to bind unix:///tmp/a.sock: address in use"
        );
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err: ScreenlinkError = io.into();
        match err {
            ScreenlinkError::Io { source, .. } => assert!(source.is_some()),
            other => panic!("Expected Io, got: {:?}", other),
        }
    }
}
