//! Registration service: version exchange, service registration and discovery.
//!
//! Peers start a [`RegistrationClient`] against a known registry location,
//! exchange protocol versions, register the locations of the services they
//! host under a comId and discover the services other peers registered under
//! the same comId. [`RegistrationServer`] is the raw server role; most
//! callers want [`DiscoveryService`](super::discovery::DiscoveryService),
//! which wires it to a discovery table.

use crate::address::ConnectionAddress;
use crate::dispatch::{ClientCall, MethodKind, Responder, RpcMethod, ServiceClient, ServiceServer};
use crate::error::Result;
use crate::service::{ServiceInformation, ServiceType};
use crate::status::{CallFailure, CallResult};
use serde::{Deserialize, Serialize};

/// Version string sent in both directions of `ExchangeVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_type: i32,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireServiceInformation {
    pub service_type: i32,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub communication_id: String,
    #[serde(default)]
    pub services: Vec<WireServiceInformation>,
}

/// Services registered under one comId.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredServices {
    pub communication_id: String,
    pub services: Vec<ServiceInformation>,
}

impl DiscoveredServices {
    /// Location of the service of `service_type`, if registered.
    pub fn location_of(&self, service_type: ServiceType) -> Option<&str> {
        self.services
            .iter()
            .find(|info| info.service_type == service_type)
            .map(|info| info.location.as_str())
    }
}

impl From<DiscoveredServices> for DiscoverResponse {
    fn from(discovered: DiscoveredServices) -> Self {
        Self {
            communication_id: discovered.communication_id,
            services: discovered
                .services
                .into_iter()
                .map(|info| WireServiceInformation {
                    service_type: info.service_type.to_wire(),
                    location: info.location,
                })
                .collect(),
        }
    }
}

impl From<DiscoverResponse> for DiscoveredServices {
    fn from(response: DiscoverResponse) -> Self {
        Self {
            communication_id: response.communication_id,
            services: response
                .services
                .into_iter()
                .map(|info| ServiceInformation {
                    service_type: ServiceType::from_wire(info.service_type),
                    location: info.location,
                })
                .collect(),
        }
    }
}

pub struct ExchangeVersion;

impl RpcMethod for ExchangeVersion {
    type Request = VersionMessage;
    type Response = VersionMessage;

    const KIND: MethodKind = MethodKind {
        service: ServiceType::Registration,
        name: "ExchangeVersion",
        function_id: 1,
        requires_com_id: false,
    };
}

pub struct RegisterService;

impl RpcMethod for RegisterService {
    type Request = RegisterServiceRequest;
    type Response = ();

    const KIND: MethodKind = MethodKind {
        service: ServiceType::Registration,
        name: "RegisterService",
        function_id: 2,
        requires_com_id: true,
    };
}

pub struct Discover;

impl RpcMethod for Discover {
    type Request = ();
    type Response = DiscoverResponse;

    const KIND: MethodKind = MethodKind {
        service: ServiceType::Registration,
        name: "Discover",
        function_id: 3,
        requires_com_id: true,
    };
}

pub const METHODS: &[MethodKind] = &[ExchangeVersion::KIND, RegisterService::KIND, Discover::KIND];

/// Client role of the registration service.
pub struct RegistrationClient {
    inner: ServiceClient,
}

impl Default for RegistrationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationClient {
    pub fn new() -> Self {
        Self {
            inner: ServiceClient::new(ServiceType::Registration),
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

    /// Access to the underlying generic client.
    pub fn service_client(&mut self) -> &mut ServiceClient {
        &mut self.inner
    }

    /// Send our version, receive the registry's.
    pub async fn exchange_version(&self, own_version: &str) -> CallResult<String> {
        let call = ClientCall::<ExchangeVersion>::new(VersionMessage {
            version: own_version.to_string(),
        })
        .translate(|response| Ok(response.version));

        self.inner.invoke("", call).await
    }

    /// Register `location` as the place where `service_type` is served for
    /// `com_id`. Registering again replaces the earlier location.
    pub async fn register_service(
        &self,
        com_id: &str,
        service_type: ServiceType,
        location: &str,
    ) -> CallResult<()> {
        let call = ClientCall::<RegisterService>::new(RegisterServiceRequest {
            service_type: service_type.to_wire(),
            location: location.to_string(),
        })
        .validate(|request| {
            !request.location.is_empty()
                && ServiceType::from_wire(request.service_type) != ServiceType::Unknown
        });

        self.inner.invoke(com_id, call).await
    }

    /// Everything registered under `com_id`.
    pub async fn discover(&self, com_id: &str) -> CallResult<DiscoveredServices> {
        let call = ClientCall::<Discover>::new(())
            .translate(|response| Ok(DiscoveredServices::from(response)));
        self.inner.invoke(com_id, call).await
    }
}

/// Server role of the registration service.
pub struct RegistrationServer {
    inner: ServiceServer,
}

impl Default for RegistrationServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationServer {
    pub fn new() -> Self {
        Self {
            inner: ServiceServer::new(ServiceType::Registration, METHODS),
        }
    }

    /// `callback(peer_version, responder)`; answer with our own version.
    pub fn set_exchange_version_callback<F>(&self, callback: F)
    where
        F: Fn(String, Responder<String>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<ExchangeVersion, _>(move |_, request, responder| {
                callback(
                    request.version,
                    responder.map(|version| VersionMessage { version }),
                )
            });
    }

    /// `callback(com_id, service_type, location, responder)`.
    ///
    /// Unknown service type discriminants arrive as `ServiceType::Unknown`.
    pub fn set_register_service_callback<F>(&self, callback: F)
    where
        F: Fn(String, ServiceType, String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<RegisterService, _>(move |com_id, request, responder| {
                callback(
                    com_id,
                    ServiceType::from_wire(request.service_type),
                    request.location,
                    responder,
                )
            });
    }

    /// `callback(com_id, responder)`.
    pub fn set_discover_callback<F>(&self, callback: F)
    where
        F: Fn(String, Responder<DiscoveredServices>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<Discover, _>(move |com_id, (), responder| {
                callback(
                    com_id,
                    responder.map(|discovered: DiscoveredServices| discovered.into()),
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

/// Check a registration request on the serving side.
///
/// Only the location is checked; an `Unknown` service type is accepted.
pub(crate) fn validate_registration(location: &str) -> CallResult<()> {
    if location.is_empty() {
        return Err(CallFailure::invalid_input());
    }
    Ok(())
}
