//! Discovery table and the registry service built on it.

use super::registration::{validate_registration, DiscoveredServices, RegistrationServer};
use crate::address::ConnectionAddress;
use crate::error::Result;
use crate::service::{ServiceInformation, ServiceType};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// comId -> (service type -> location).
///
/// One entry per service type within a comId; registering the same type
/// again replaces its location. Sessions appear on first registration and
/// only disappear through [`evict_session`](Self::evict_session).
#[derive(Debug, Default)]
pub struct DiscoveryTable {
    sessions: Mutex<HashMap<String, BTreeMap<ServiceType, String>>>,
}

impl DiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<ServiceType, String>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the location of `service_type` under `com_id`.
    ///
    /// Returns the previous location, if any.
    pub fn register(
        &self,
        com_id: &str,
        service_type: ServiceType,
        location: &str,
    ) -> Option<String> {
        let previous = self
            .lock()
            .entry(com_id.to_string())
            .or_default()
            .insert(service_type, location.to_string());

        debug!(
            "Registered {} for {} at {} (replaced: {:?})",
            service_type, com_id, location, previous
        );
        previous
    }

    /// Snapshot of everything registered under `com_id`, ordered by type.
    pub fn discover(&self, com_id: &str) -> Vec<ServiceInformation> {
        self.lock()
            .get(com_id)
            .map(|services| {
                services
                    .iter()
                    .map(|(service_type, location)| {
                        ServiceInformation::new(*service_type, location)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the registration of `service_type` under `com_id`.
    pub fn unregister(&self, com_id: &str, service_type: ServiceType) -> bool {
        let mut sessions = self.lock();
        let Some(services) = sessions.get_mut(com_id) else {
            return false;
        };

        let removed = services.remove(&service_type).is_some();
        if services.is_empty() {
            sessions.remove(com_id);
        }
        removed
    }

    /// Drop every registration under `com_id`. Returns how many were removed.
    pub fn evict_session(&self, com_id: &str) -> usize {
        let removed = self
            .lock()
            .remove(com_id)
            .map(|services| services.len())
            .unwrap_or(0);
        if removed > 0 {
            info!("Evicted session {} ({} services)", com_id, removed);
        }
        removed
    }

    /// Known comIds, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.lock().keys().cloned().collect();
        sessions.sort();
        sessions
    }
}

/// A registry: a registration server answering from its own discovery table.
pub struct DiscoveryService {
    table: Arc<DiscoveryTable>,
    server: RegistrationServer,
    version: String,
}

impl DiscoveryService {
    /// Create a registry that answers `ExchangeVersion` with `version`.
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        let table = Arc::new(DiscoveryTable::new());
        let server = RegistrationServer::new();

        let own_version = version.clone();
        server.set_exchange_version_callback(move |peer_version, responder| {
            debug!("Peer reports version {}", peer_version);
            responder.ok(own_version.clone());
        });

        let registrations = table.clone();
        server.set_register_service_callback(move |com_id, service_type, location, responder| {
            let result = validate_registration(&location).map(|()| {
                registrations.register(&com_id, service_type, &location);
            });
            responder.send(result);
        });

        let lookups = table.clone();
        server.set_discover_callback(move |com_id, responder| {
            let services = lookups.discover(&com_id);
            responder.ok(DiscoveredServices {
                communication_id: com_id,
                services,
            });
        });

        Self {
            table,
            server,
            version,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn table(&self) -> &Arc<DiscoveryTable> {
        &self.table
    }

    /// Start serving at `location`. Returns the effective location.
    pub async fn start(&mut self, location: &str) -> Result<ConnectionAddress> {
        self.server.start(location).await
    }

    pub fn stop(&mut self) {
        self.server.stop()
    }

    pub fn location(&self) -> Option<&ConnectionAddress> {
        self.server.location()
    }

    pub fn evict_session(&self, com_id: &str) -> usize {
        self.table.evict_session(com_id)
    }

    pub fn unregister(&self, com_id: &str, service_type: ServiceType) -> bool {
        self.table.unregister(com_id, service_type)
    }

    pub fn server(&self) -> &RegistrationServer {
        &self.server
    }
}
