//! Server side of the generic dispatch.
//!
//! A [`ServiceServer`] owns the [`CallbackRegistry`] for one service and
//! turns every inbound [`WireRequest`] into a [`WireReply`]:
//!
//! 1. A method that needs a comId fails with `NoComId` when none was sent.
//! 2. A method without a bound handler fails with `NoCallbackRegistered`.
//! 3. The payload is decoded into the method's request type.
//! 4. The handler runs with the request and a single-use [`Responder`].
//! 5. The reply is whatever the handler sends through the responder, now or
//!    later from another task. A responder dropped without sending yields
//!    `ResponseNotSent`.
//!
//! There is no timeout on step 5.

use super::registry::{ErasedHandler, PendingReply};
use super::{find_method, CallbackRegistry, MethodKind, RpcMethod};
use crate::address::ConnectionAddress;
use crate::error::{Result, ScreenlinkError};
use crate::service::ServiceType;
use crate::status::{CallFailure, CallResult, FailureKind};
use crate::transport::{self, InboundDispatch, ServerHandle, WireReply, WireRequest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Encoder<T> = Box<dyn FnOnce(T) -> serde_json::Result<Vec<u8>> + Send>;

/// Completes one inbound call.
///
/// Sending consumes the responder, so a call is answered at most once. It
/// can be moved to another task and used later.
pub struct Responder<T> {
    reply: oneshot::Sender<CallResult<Vec<u8>>>,
    encode: Encoder<T>,
    method: &'static str,
}

impl<T: Serialize + 'static> Responder<T> {
    pub(crate) fn new(reply: oneshot::Sender<CallResult<Vec<u8>>>, method: &'static str) -> Self {
        Self {
            reply,
            encode: Box::new(|value: T| serde_json::to_vec(&value)),
            method,
        }
    }
}

impl<T: 'static> Responder<T> {
    /// Answer the call.
    pub fn send(self, result: CallResult<T>) {
        let Responder {
            reply,
            encode,
            method,
        } = self;

        let encoded = result.and_then(|value| {
            encode(value).map_err(|e| {
                CallFailure::aborted(format!("failed to encode {} response: {}", method, e))
            })
        });

        if reply.send(encoded).is_err() {
            debug!("{} response discarded: caller went away", method);
        }
    }

    /// Answer the call successfully.
    pub fn ok(self, value: T) {
        self.send(Ok(value));
    }

    /// Fail the call with the handler's own reason.
    pub fn fail(self, message: impl Into<String>) {
        self.send(Err(CallFailure::aborted(message)));
    }

    /// A responder that accepts `U` and converts it before answering.
    pub fn map<U: 'static>(self, convert: impl FnOnce(U) -> T + Send + 'static) -> Responder<U> {
        let encode = self.encode;
        Responder {
            reply: self.reply,
            encode: Box::new(move |value: U| encode(convert(value))),
            method: self.method,
        }
    }

    /// Name of the method this responder answers.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Whether nobody waits for the answer any more.
    pub fn is_closed(&self) -> bool {
        self.reply.is_closed()
    }
}

impl<T> fmt::Debug for Responder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

struct ServerCore {
    service: ServiceType,
    methods: &'static [MethodKind],
    callbacks: CallbackRegistry,
}

impl ServerCore {
    async fn handle(&self, request: WireRequest) -> CallResult<Vec<u8>> {
        let kind = find_method(self.methods, request.function_id)
            .ok_or_else(|| CallFailure::of(FailureKind::NoCallbackRegistered))?;

        let com_id = request.com_id.filter(|com_id| !com_id.is_empty());
        if kind.requires_com_id && com_id.is_none() {
            return Err(CallFailure::of(FailureKind::NoComId));
        }

        let handler = self
            .callbacks
            .get(kind)
            .ok_or_else(|| CallFailure::of(FailureKind::NoCallbackRegistered))?;

        let pending = handler(com_id.unwrap_or_default(), &request.payload)?;

        match pending.await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} {} handler dropped its responder without answering",
                    self.service, kind.name
                );
                Err(CallFailure::of(FailureKind::ResponseNotSent))
            }
        }
    }
}

#[async_trait::async_trait]
impl InboundDispatch for ServerCore {
    async fn dispatch(&self, request: WireRequest) -> WireReply {
        let function_id = request.function_id;
        match self.handle(request).await {
            Ok(payload) => WireReply::ok(payload),
            Err(failure) => {
                debug!(
                    "{} call {} failed: {}",
                    self.service, function_id, failure.message
                );
                WireReply::failed(&failure)
            }
        }
    }
}

/// Server role of one service.
pub struct ServiceServer {
    core: Arc<ServerCore>,
    handle: Option<ServerHandle>,
}

impl ServiceServer {
    /// Create a server for `service` exposing `methods`.
    pub fn new(service: ServiceType, methods: &'static [MethodKind]) -> Self {
        Self {
            core: Arc::new(ServerCore {
                service,
                methods,
                callbacks: CallbackRegistry::new(),
            }),
            handle: None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.core.service
    }

    /// Bind the handler for method `M`, replacing any earlier one.
    ///
    /// The handler gets the caller's comId (empty for methods without one),
    /// the decoded request and the responder. It must not block; work that
    /// takes time belongs in a spawned task that keeps the responder.
    pub fn set_callback<M, F>(&self, handler: F)
    where
        M: RpcMethod,
        F: Fn(String, M::Request, Responder<M::Response>) + Send + Sync + 'static,
    {
        let kind = M::KIND;
        assert_eq!(
            kind.service, self.core.service,
            "{} belongs to another service",
            kind.name
        );

        let erased: ErasedHandler = Arc::new(
            move |com_id: String, payload: &[u8]| -> CallResult<PendingReply> {
                let request: M::Request = serde_json::from_slice(payload).map_err(|e| {
                    CallFailure::new(
                        FailureKind::InvalidInputParameter,
                        format!("failed to decode {} request: {}", kind.name, e),
                    )
                })?;
                let (tx, rx) = oneshot::channel();
                handler(com_id, request, Responder::new(tx, kind.name));
                Ok(rx)
            },
        );

        self.core.callbacks.set(&kind, erased);
    }

    /// The entry point the transport calls for inbound requests.
    pub fn dispatcher(&self) -> Arc<dyn InboundDispatch> {
        self.core.clone()
    }

    /// Bind `location` and start serving. Returns the effective location.
    pub async fn start(&mut self, location: &str) -> Result<ConnectionAddress> {
        if let Some(handle) = &self.handle {
            return Err(ScreenlinkError::AlreadyStarted {
                location: handle.location().to_string(),
            });
        }

        let bound = self.core.callbacks.len();
        if bound == 0 {
            warn!(
                "{} server starting with no handlers; every call will fail",
                self.core.service
            );
        }

        let handle = transport::serve(location, self.dispatcher()).await?;
        let effective = handle.location().clone();
        info!(
            "{} server started at {} ({} of {} methods handled)",
            self.core.service,
            effective,
            bound,
            self.core.methods.len()
        );
        self.handle = Some(handle);
        Ok(effective)
    }

    /// Stop serving. Calls already dispatched to a handler are abandoned.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.shutdown();
        }
    }

    pub fn location(&self) -> Option<&ConnectionAddress> {
        self.handle.as_ref().map(|handle| handle.location())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}
