//! Service catalog built on the generic dispatch.
//!
//! - [`registration`]: version exchange, registration and discovery
//! - [`discovery`]: the discovery table and the registry service serving it
//! - [`chat`]: ChatIn
//! - [`access_control`]: AccessControlOut

pub mod access_control;
pub mod chat;
pub mod discovery;
pub mod registration;

pub use access_control::{Access, AccessControl, AccessControlOutClient, AccessControlOutServer};
pub use chat::{ChatInClient, ChatInServer, ChatInfo, ChatState, ChatType};
pub use discovery::{DiscoveryService, DiscoveryTable};
pub use registration::{DiscoveredServices, RegistrationClient, RegistrationServer};
