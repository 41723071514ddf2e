//! Uniform per-call outcome model.
//!
//! Every client call and every server-side dispatch ends in a
//! [`CallResult`]. Failures are values, never panics: a [`CallFailure`]
//! names its [`FailureKind`] and carries a non-empty message.
//!
//! [`CallStatus`] is the flattened `{state, error_message}` view used when
//! the payload does not matter. Every envelope header carries one.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedAddress,
    InvalidInputParameter,
    ClientNotStarted,
    TransportFailure,
    NoCallbackRegistered,
    InvalidResponseValue,
    /// Server side: the method needs a comId and none was sent.
    NoComId,
    /// Server side: the handler dropped its responder without answering.
    ResponseNotSent,
    /// The handler answered with its own failure.
    Aborted,
}

impl FailureKind {
    /// Message used when a failure is created without one.
    pub fn default_message(&self) -> &'static str {
        match self {
            FailureKind::MalformedAddress => "malformed address",
            FailureKind::InvalidInputParameter => "invalid input parameter",
            FailureKind::ClientNotStarted => "client not started",
            FailureKind::TransportFailure => "transport failure",
            FailureKind::NoCallbackRegistered => "no processing callback set",
            FailureKind::InvalidResponseValue => "invalid response value",
            FailureKind::NoComId => "no comId provided",
            FailureKind::ResponseNotSent => "response callback not called",
            FailureKind::Aborted => "call aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_message())
    }
}

/// A failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CallFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CallFailure {
    /// Create a failure. An empty message is replaced by the kind's default.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            kind.default_message().to_string()
        } else {
            message
        };
        Self { kind, message }
    }

    /// Create a failure with the kind's default message.
    pub fn of(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
        }
    }

    pub fn invalid_input() -> Self {
        Self::of(FailureKind::InvalidInputParameter)
    }

    pub fn invalid_response() -> Self {
        Self::of(FailureKind::InvalidResponseValue)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransportFailure, message)
    }

    /// Failure reported by a handler for its own reasons.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Aborted, message)
    }
}

/// Result of a single RPC call.
pub type CallResult<T> = std::result::Result<T, CallFailure>;

/// Coarse call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ok,
    Failed,
}

/// Flattened `{state, error_message}` view of a call outcome.
///
/// `Failed` always carries a non-empty message; `Ok` carries an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatus {
    pub state: CallState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl CallStatus {
    pub fn ok() -> Self {
        Self {
            state: CallState::Ok,
            error_message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            state: CallState::Failed,
            error_message: if message.is_empty() {
                FailureKind::Aborted.default_message().to_string()
            } else {
                message
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state == CallState::Ok
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl<T> From<&CallResult<T>> for CallStatus {
    fn from(result: &CallResult<T>) -> Self {
        match result {
            Ok(_) => CallStatus::ok(),
            Err(failure) => CallStatus::failed(failure.message.clone()),
        }
    }
}

impl From<&CallFailure> for CallStatus {
    fn from(failure: &CallFailure) -> Self {
        CallStatus::failed(failure.message.clone())
    }
}
