//! Generic call dispatch shared by every service.
//!
//! A service declares each of its methods as a type implementing
//! [`RpcMethod`]: the request and response types plus a [`MethodKind`]
//! naming the method on the wire. The generic [`ServiceClient`] and
//! [`ServiceServer`] then run the same invocation algorithm for every
//! method of every service:
//!
//! ```text
//! client: started? -> validate input -> attach comId -> transport -> translate reply
//! server: comId present? -> handler bound? -> decode -> handler(responder) -> await reply
//! ```

pub mod client;
pub mod registry;
pub mod server;

pub use client::{ClientCall, ServiceClient};
pub use registry::CallbackRegistry;
pub use server::{Responder, ServiceServer};

use crate::service::ServiceType;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wire identity of one method of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKind {
    pub service: ServiceType,
    pub name: &'static str,
    /// Unique within `service`.
    pub function_id: u32,
    /// Whether calls must carry a non-empty comId.
    pub requires_com_id: bool,
}

/// A method a service exposes.
pub trait RpcMethod: Send + Sync + 'static {
    type Request: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;

    const KIND: MethodKind;
}

/// Find a method in a service's method table.
pub fn find_method(methods: &[MethodKind], function_id: u32) -> Option<&MethodKind> {
    methods.iter().find(|kind| kind.function_id == function_id)
}
