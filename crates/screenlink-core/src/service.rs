//! Service family identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one RPC service family.
///
/// On the wire a service type is its `i32` discriminant. Decoding is lenient:
/// a discriminant this build does not know decodes to [`ServiceType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Unknown,
    Registration,
    Image,
    ImageNotification,
    Connectivity,
    Input,
    SessionControl,
    SessionStatus,
    AccessControlIn,
    AccessControlOut,
    InstantSupport,
    ViewGeometry,
    InstantSupportNotification,
    ChatIn,
    ChatOut,
    ConnectionConfirmationRequest,
    ConnectionConfirmationResponse,
}

impl ServiceType {
    pub const ALL: [ServiceType; 17] = [
        ServiceType::Unknown,
        ServiceType::Registration,
        ServiceType::Image,
        ServiceType::ImageNotification,
        ServiceType::Connectivity,
        ServiceType::Input,
        ServiceType::SessionControl,
        ServiceType::SessionStatus,
        ServiceType::AccessControlIn,
        ServiceType::AccessControlOut,
        ServiceType::InstantSupport,
        ServiceType::ViewGeometry,
        ServiceType::InstantSupportNotification,
        ServiceType::ChatIn,
        ServiceType::ChatOut,
        ServiceType::ConnectionConfirmationRequest,
        ServiceType::ConnectionConfirmationResponse,
    ];

    pub fn to_wire(self) -> i32 {
        self as i32
    }

    /// Decode a wire discriminant, returning `None` if it is out of range.
    pub fn try_from_wire(value: i32) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Decode a wire discriminant, mapping out-of-range values to `Unknown`.
    pub fn from_wire(value: i32) -> Self {
        Self::try_from_wire(value).unwrap_or(ServiceType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Unknown => "unknown",
            ServiceType::Registration => "registration",
            ServiceType::Image => "image",
            ServiceType::ImageNotification => "image_notification",
            ServiceType::Connectivity => "connectivity",
            ServiceType::Input => "input",
            ServiceType::SessionControl => "session_control",
            ServiceType::SessionStatus => "session_status",
            ServiceType::AccessControlIn => "access_control_in",
            ServiceType::AccessControlOut => "access_control_out",
            ServiceType::InstantSupport => "instant_support",
            ServiceType::ViewGeometry => "view_geometry",
            ServiceType::InstantSupportNotification => "instant_support_notification",
            ServiceType::ChatIn => "chat_in",
            ServiceType::ChatOut => "chat_out",
            ServiceType::ConnectionConfirmationRequest => "connection_confirmation_request",
            ServiceType::ConnectionConfirmationResponse => "connection_confirmation_response",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a service of a given type can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInformation {
    pub service_type: ServiceType,
    pub location: String,
}

impl ServiceInformation {
    pub fn new(service_type: ServiceType, location: impl Into<String>) -> Self {
        Self {
            service_type,
            location: location.into(),
        }
    }
}
