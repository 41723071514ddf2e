//! Per-server table of inbound call handlers.

use super::MethodKind;
use crate::service::ServiceType;
use crate::status::CallResult;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::oneshot;

/// Receives the encoded outcome of one inbound call.
pub(crate) type PendingReply = oneshot::Receiver<CallResult<Vec<u8>>>;

/// A type-erased handler: takes the comId and the encoded request, starts the
/// user handler and hands back the receiving end of its responder.
pub(crate) type ErasedHandler =
    Arc<dyn Fn(String, &[u8]) -> CallResult<PendingReply> + Send + Sync>;

/// Exactly one handler per (service, method) for one server instance.
///
/// A later `set` for the same method replaces the earlier handler. Lookups
/// clone the handler out of the table, so a call in flight keeps the handler
/// it resolved even if the binding changes meanwhile.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<(ServiceType, u32), ErasedHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: &MethodKind) -> (ServiceType, u32) {
        (kind.service, kind.function_id)
    }

    pub(crate) fn set(&self, kind: &MethodKind, handler: ErasedHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.insert(Self::key(kind), handler);
    }

    pub(crate) fn get(&self, kind: &MethodKind) -> Option<ErasedHandler> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&Self::key(kind)).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
