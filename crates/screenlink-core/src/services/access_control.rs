//! AccessControlOut service: the host asks the plugin to confirm a feature
//! and tells it when the access rules for a feature change.
//!
//! Discriminants the server does not recognize decode to `Undefined`; the
//! handler decides what to do with them. The client refuses to send
//! `Undefined`.

use crate::address::ConnectionAddress;
use crate::dispatch::{ClientCall, MethodKind, Responder, RpcMethod, ServiceClient, ServiceServer};
use crate::error::Result;
use crate::service::ServiceType;
use crate::status::CallResult;
use serde::{Deserialize, Serialize};

/// Wire value used for `Undefined`; never accepted by the client.
const UNDEFINED_WIRE: i32 = -1;

/// A feature whose use is subject to access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessControl {
    FileTransfer,
    AllowPartnerViewDesktop,
    RemoteControl,
    Undefined,
}

impl AccessControl {
    pub fn to_wire(self) -> i32 {
        match self {
            AccessControl::FileTransfer => 0,
            AccessControl::AllowPartnerViewDesktop => 1,
            AccessControl::RemoteControl => 2,
            AccessControl::Undefined => UNDEFINED_WIRE,
        }
    }

    pub fn from_wire(value: i32) -> Self {
        match value {
            0 => AccessControl::FileTransfer,
            1 => AccessControl::AllowPartnerViewDesktop,
            2 => AccessControl::RemoteControl,
            _ => AccessControl::Undefined,
        }
    }
}

/// Access rule for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Allowed,
    AfterConfirmation,
    Denied,
    Undefined,
}

impl Access {
    pub fn to_wire(self) -> i32 {
        match self {
            Access::Allowed => 0,
            Access::AfterConfirmation => 1,
            Access::Denied => 2,
            Access::Undefined => UNDEFINED_WIRE,
        }
    }

    pub fn from_wire(value: i32) -> Self {
        match value {
            0 => Access::Allowed,
            1 => Access::AfterConfirmation,
            2 => Access::Denied,
            _ => Access::Undefined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskForConfirmationRequest {
    pub feature: i32,
    /// Seconds the plugin may take to answer. Interpreted by the handler.
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskForConfirmationResponse {
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyChangeRequest {
    pub feature: i32,
    pub access: i32,
}

pub struct AskForConfirmation;

impl RpcMethod for AskForConfirmation {
    type Request = AskForConfirmationRequest;
    type Response = AskForConfirmationResponse;

    const KIND: MethodKind = MethodKind {
        service: ServiceType::AccessControlOut,
        name: "AskForConfirmation",
        function_id: 1,
        requires_com_id: true,
    };
}

pub struct NotifyChange;

impl RpcMethod for NotifyChange {
    type Request = NotifyChangeRequest;
    type Response = ();

    const KIND: MethodKind = MethodKind {
        service: ServiceType::AccessControlOut,
        name: "NotifyChange",
        function_id: 2,
        requires_com_id: true,
    };
}

pub const METHODS: &[MethodKind] = &[AskForConfirmation::KIND, NotifyChange::KIND];

/// Client role of the AccessControlOut service.
pub struct AccessControlOutClient {
    inner: ServiceClient,
}

impl Default for AccessControlOutClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessControlOutClient {
    pub fn new() -> Self {
        Self {
            inner: ServiceClient::new(ServiceType::AccessControlOut),
        }
    }

    pub fn start(&mut self, destination: &str) -> Result<()> {
        self.inner.start(destination)
    }

    pub fn stop(&mut self) {
        self.inner.stop()
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    /// Ask whether `feature` may be used. Returns the plugin's decision.
    ///
    /// The call completes when the plugin answers; `timeout` only tells the
    /// plugin how long it may wait for its user.
    pub async fn ask_for_confirmation(
        &self,
        com_id: &str,
        feature: AccessControl,
        timeout: u32,
    ) -> CallResult<bool> {
        let call = ClientCall::<AskForConfirmation>::new(AskForConfirmationRequest {
            feature: feature.to_wire(),
            timeout,
        })
        .validate(|request| AccessControl::from_wire(request.feature) != AccessControl::Undefined)
        .translate(|response| Ok(response.confirmed));

        self.inner.invoke(com_id, call).await
    }

    pub async fn notify_change(
        &self,
        com_id: &str,
        feature: AccessControl,
        access: Access,
    ) -> CallResult<()> {
        let call = ClientCall::<NotifyChange>::new(NotifyChangeRequest {
            feature: feature.to_wire(),
            access: access.to_wire(),
        })
        .validate(|request| {
            AccessControl::from_wire(request.feature) != AccessControl::Undefined
                && Access::from_wire(request.access) != Access::Undefined
        });

        self.inner.invoke(com_id, call).await
    }
}

/// Server role of the AccessControlOut service.
pub struct AccessControlOutServer {
    inner: ServiceServer,
}

impl Default for AccessControlOutServer {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessControlOutServer {
    pub fn new() -> Self {
        Self {
            inner: ServiceServer::new(ServiceType::AccessControlOut, METHODS),
        }
    }

    /// `callback(com_id, feature, timeout, responder)`.
    ///
    /// The handler typically keeps the responder until its user decides or
    /// `timeout` runs out.
    pub fn set_confirmation_request_callback<F>(&self, callback: F)
    where
        F: Fn(String, AccessControl, u32, Responder<bool>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<AskForConfirmation, _>(move |com_id, request, responder| {
                callback(
                    com_id,
                    AccessControl::from_wire(request.feature),
                    request.timeout,
                    responder.map(|confirmed| AskForConfirmationResponse { confirmed }),
                )
            });
    }

    /// `callback(com_id, feature, access, responder)`.
    pub fn set_notify_change_callback<F>(&self, callback: F)
    where
        F: Fn(String, AccessControl, Access, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<NotifyChange, _>(move |com_id, request, responder| {
                callback(
                    com_id,
                    AccessControl::from_wire(request.feature),
                    Access::from_wire(request.access),
                    responder,
                )
            });
    }

    pub async fn start(&mut self, location: &str) -> Result<ConnectionAddress> {
        self.inner.start(location).await
    }

    pub fn stop(&mut self) {
        self.inner.stop()
    }

    pub fn location(&self) -> Option<&ConnectionAddress> {
        self.inner.location()
    }

    pub fn service_server(&self) -> &ServiceServer {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FailureKind;
    use crate::transport::{WireRequest, WireStatus};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unknown_discriminants_decode_to_undefined() {
        assert_eq!(AccessControl::from_wire(7), AccessControl::Undefined);
        assert_eq!(AccessControl::from_wire(2), AccessControl::RemoteControl);
        assert_eq!(Access::from_wire(-5), Access::Undefined);
        assert_eq!(Access::from_wire(1), Access::AfterConfirmation);
    }

    #[tokio::test]
    async fn test_client_refuses_undefined() {
        let mut client = AccessControlOutClient::new();
        client.start("tcp+tv://127.0.0.1:9").unwrap();

        let failure = client
            .ask_for_confirmation("c", AccessControl::Undefined, 10)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInputParameter);

        let failure = client
            .notify_change("c", AccessControl::FileTransfer, Access::Undefined)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInputParameter);
    }

    #[tokio::test]
    async fn test_server_passes_unknown_feature_as_undefined() {
        let seen = Arc::new(Mutex::new(None));
        let server = AccessControlOutServer::new();
        let record = seen.clone();
        server.set_notify_change_callback(move |_, feature, access, responder| {
            *record.lock().unwrap() = Some((feature, access));
            responder.ok(());
        });

        let request = WireRequest {
            com_id: Some("c".to_string()),
            function_id: NotifyChange::KIND.function_id,
            payload: serde_json::to_vec(&NotifyChangeRequest {
                feature: 99,
                access: 2,
            })
            .unwrap(),
        };
        let reply = server.service_server().dispatcher().dispatch(request).await;

        assert_eq!(reply.status, WireStatus::ok());
        assert_eq!(
            *seen.lock().unwrap(),
            Some((AccessControl::Undefined, Access::Denied))
        );
    }
}
