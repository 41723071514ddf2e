//! Client side of the generic dispatch.

use super::RpcMethod;
use crate::address::ConnectionAddress;
use crate::error::Result;
use crate::service::ServiceType;
use crate::status::{CallFailure, CallResult, FailureKind};
use crate::transport::{self, ClientChannel, WireRequest};
use std::sync::Arc;
use tracing::debug;

type Validator<Req> = Box<dyn Fn(&Req) -> bool + Send + Sync>;
type Translator<Resp, Out> = Box<dyn FnOnce(Resp) -> CallResult<Out> + Send>;

/// One call of method `M`, ready to be invoked.
///
/// Carries the request plus the optional input validator and the response
/// translator. By default there is no validator and the translator discards
/// the response payload.
pub struct ClientCall<M: RpcMethod, Out = ()> {
    request: M::Request,
    validator: Option<Validator<M::Request>>,
    translator: Translator<M::Response, Out>,
}

impl<M: RpcMethod> ClientCall<M, ()> {
    pub fn new(request: M::Request) -> Self {
        Self {
            request,
            validator: None,
            translator: Box::new(|_| Ok(())),
        }
    }
}

impl<M: RpcMethod, Out> ClientCall<M, Out> {
    /// Reject the call with `InvalidInputParameter` unless `check` passes.
    pub fn validate(mut self, check: impl Fn(&M::Request) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(check));
        self
    }

    /// Replace the response translator.
    pub fn translate<O2>(
        self,
        translate: impl FnOnce(M::Response) -> CallResult<O2> + Send + 'static,
    ) -> ClientCall<M, O2> {
        ClientCall {
            request: self.request,
            validator: self.validator,
            translator: Box::new(translate),
        }
    }

    /// Hand the decoded response back unchanged.
    pub fn returning(self) -> ClientCall<M, M::Response> {
        self.translate(Ok)
    }

    pub fn request(&self) -> &M::Request {
        &self.request
    }
}

/// Client role of one service.
///
/// `start` binds the client to a destination without connecting; the
/// channel connects on the first call. Calls on a client that was never
/// started fail with `ClientNotStarted` and never reach the network.
pub struct ServiceClient {
    service: ServiceType,
    channel: Option<Arc<dyn ClientChannel>>,
}

impl ServiceClient {
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            channel: None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service
    }

    /// Bind the client to `destination`, replacing any earlier binding.
    ///
    /// Fails on a malformed URL or a scheme without a transport.
    pub fn start(&mut self, destination: &str) -> Result<()> {
        let channel = transport::connect_channel(destination)?;
        self.start_with_channel(channel);
        Ok(())
    }

    /// Bind the client to an existing channel.
    pub fn start_with_channel(&mut self, channel: Arc<dyn ClientChannel>) {
        debug!("{} client bound to {}", self.service, channel.destination());
        self.channel = Some(channel);
    }

    pub fn stop(&mut self) {
        if self.channel.take().is_some() {
            debug!("{} client stopped", self.service);
        }
    }

    pub fn is_started(&self) -> bool {
        self.channel.is_some()
    }

    pub fn destination(&self) -> Option<&ConnectionAddress> {
        self.channel.as_ref().map(|channel| channel.destination())
    }

    /// Run one call.
    ///
    /// `com_id` may be empty only for methods that do not require one.
    pub async fn invoke<M, Out>(&self, com_id: &str, call: ClientCall<M, Out>) -> CallResult<Out>
    where
        M: RpcMethod,
    {
        let kind = M::KIND;
        debug_assert_eq!(kind.service, self.service, "{} belongs to another service", kind.name);

        let channel = self
            .channel
            .clone()
            .ok_or_else(|| CallFailure::of(FailureKind::ClientNotStarted))?;

        if kind.requires_com_id && com_id.is_empty() {
            return Err(CallFailure::invalid_input());
        }
        if let Some(validator) = &call.validator {
            if !validator(&call.request) {
                return Err(CallFailure::invalid_input());
            }
        }

        let payload = serde_json::to_vec(&call.request).map_err(|e| {
            CallFailure::new(
                FailureKind::InvalidInputParameter,
                format!("failed to encode {} request: {}", kind.name, e),
            )
        })?;

        let request = WireRequest {
            com_id: (!com_id.is_empty()).then(|| com_id.to_string()),
            function_id: kind.function_id,
            payload,
        };

        let reply = channel.call(request).await.map_err(|e| {
            debug!("{} {} transport failure: {}", self.service, kind.name, e);
            CallFailure::transport(e.to_string())
        })?;

        reply.status.into_result()?;

        let response: M::Response = serde_json::from_slice(&reply.payload).map_err(|e| {
            CallFailure::new(
                FailureKind::InvalidResponseValue,
                format!("failed to decode {} response: {}", kind.name, e),
            )
        })?;

        (call.translator)(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MethodKind;
    use crate::error::ScreenlinkError;
    use crate::transport::{TransportError, WireReply};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct LoadMessages;

    impl RpcMethod for LoadMessages {
        type Request = u32;
        type Response = i32;

        const KIND: MethodKind = MethodKind {
            service: ServiceType::ChatIn,
            name: "LoadMessages",
            function_id: 4,
            requires_com_id: true,
        };
    }

    /// Channel that records requests and answers with a canned reply.
    struct MockChannel {
        destination: ConnectionAddress,
        calls: AtomicUsize,
        last: Mutex<Option<WireRequest>>,
        reply: fn() -> std::result::Result<WireReply, TransportError>,
    }

    impl MockChannel {
        fn new(reply: fn() -> std::result::Result<WireReply, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                destination: ConnectionAddress::parse("tcp+tv://mock:1").unwrap(),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
                reply,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ClientChannel for MockChannel {
        async fn call(
            &self,
            request: WireRequest,
        ) -> std::result::Result<WireReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            (self.reply)()
        }

        fn destination(&self) -> &ConnectionAddress {
            &self.destination
        }
    }

    fn reply_with(value: i32) -> std::result::Result<WireReply, TransportError> {
        Ok(WireReply::ok(serde_json::to_vec(&value).unwrap()))
    }

    fn client_with(channel: &Arc<MockChannel>) -> ServiceClient {
        let mut client = ServiceClient::new(ServiceType::ChatIn);
        client.start_with_channel(channel.clone());
        client
    }

    #[tokio::test]
    async fn test_not_started() {
        let client = ServiceClient::new(ServiceType::ChatIn);
        let failure = client
            .invoke("c", ClientCall::<LoadMessages>::new(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::ClientNotStarted);
        assert_eq!(failure.message, "client not started");
    }

    #[tokio::test]
    async fn test_stopped_client_is_not_started() {
        let channel = MockChannel::new(|| reply_with(1));
        let mut client = client_with(&channel);
        client.stop();

        let failure = client
            .invoke("c", ClientCall::<LoadMessages>::new(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::ClientNotStarted);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_com_id_never_reaches_transport() {
        let channel = MockChannel::new(|| reply_with(1));
        let client = client_with(&channel);

        let failure = client
            .invoke("", ClientCall::<LoadMessages>::new(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInputParameter);
        assert_eq!(failure.message, "invalid input parameter");
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_validator_rejects_input() {
        let channel = MockChannel::new(|| reply_with(1));
        let client = client_with(&channel);

        let call = ClientCall::<LoadMessages>::new(0).validate(|count| *count != 0);
        let failure = client.invoke("c", call).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInputParameter);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_default_translator_and_metadata() {
        let channel = MockChannel::new(|| reply_with(5));
        let client = client_with(&channel);

        client
            .invoke("session-9", ClientCall::<LoadMessages>::new(3))
            .await
            .unwrap();

        let sent = channel.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.com_id.as_deref(), Some("session-9"));
        assert_eq!(sent.function_id, 4);
        assert_eq!(sent.payload, b"3");
    }

    #[tokio::test]
    async fn test_translator_rejects_unknown_discriminant() {
        let channel = MockChannel::new(|| reply_with(7));
        let client = client_with(&channel);

        let call = ClientCall::<LoadMessages>::new(1).translate(|value| match value {
            0 | 1 => Ok(value == 1),
            _ => Err(CallFailure::invalid_response()),
        });
        let failure = client.invoke("c", call).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidResponseValue);
        assert_eq!(failure.message, "invalid response value");
    }

    #[tokio::test]
    async fn test_returning_passes_payload_through() {
        let channel = MockChannel::new(|| reply_with(42));
        let client = client_with(&channel);

        let value = client
            .invoke("c", ClientCall::<LoadMessages>::new(1).returning())
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let channel = MockChannel::new(|| Err(TransportError::Closed));
        let client = client_with(&channel);

        let failure = client
            .invoke("c", ClientCall::<LoadMessages>::new(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::TransportFailure);
        assert_eq!(failure.message, "connection closed by peer");
    }

    #[tokio::test]
    async fn test_remote_failure_is_passed_through() {
        let channel = MockChannel::new(|| {
            Ok(WireReply::failed(&CallFailure::of(
                FailureKind::NoCallbackRegistered,
            )))
        });
        let client = client_with(&channel);

        let failure = client
            .invoke("c", ClientCall::<LoadMessages>::new(1))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::NoCallbackRegistered);
        assert_eq!(failure.message, "no processing callback set");
    }

    #[test]
    fn test_start_rejects_bad_destinations() {
        let mut client = ServiceClient::new(ServiceType::ChatIn);
        assert!(matches!(
            client.start("unix:///tmp//"),
            Err(ScreenlinkError::MalformedAddress { .. })
        ));
        assert!(matches!(
            client.start("http://localhost:8000/path"),
            Err(ScreenlinkError::UnsupportedTransport { .. })
        ));
        assert!(!client.is_started());

        client.start("tcp+tv://127.0.0.1:9").unwrap();
        assert!(client.is_started());
        assert_eq!(client.destination().unwrap().port(), 9);
    }
}
