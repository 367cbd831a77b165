//! Registry of locally hosted providers.
//!
//! Inbound interactions are routed by the destination URI of their header
//! together with the service area and service number.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use mal_transport::{MessageHeader, Transport, Uri};
use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::handler::InteractionHandler;

/// Service area and service number of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    /// Service area number.
    pub area: u16,
    /// Service number within the area.
    pub service: u16,
}

impl ServiceKey {
    /// Creates a key.
    pub const fn new(area: u16, service: u16) -> Self {
        Self { area, service }
    }

    /// The key addressed by a message header.
    pub const fn of(header: &MessageHeader) -> Self {
        Self::new(header.service_area, header.service)
    }
}

/// Where inbound interactions for one provider are delivered.
#[derive(Clone)]
pub struct Address {
    /// Endpoint the provider replies through.
    pub transport: Arc<dyn Transport>,
    /// Credential stamped on the provider's replies.
    pub authentication_id: Bytes,
    /// Application handler.
    pub handler: Arc<dyn InteractionHandler>,
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("uri", self.transport.uri())
            .field("authentication_id", &self.authentication_id)
            .finish_non_exhaustive()
    }
}

/// Providers keyed by (local endpoint URI, service).
#[derive(Debug, Default)]
pub struct AddressRegistry {
    addresses: RwLock<HashMap<(Uri, ServiceKey), Address>>,
}

impl AddressRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider at the URI of its transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderExists`] if the address is taken.
    pub fn register(&self, service: ServiceKey, address: Address) -> Result<()> {
        let uri = address.transport.uri().clone();
        let mut addresses = self.addresses.write();

        let key = (uri, service);
        if addresses.contains_key(&key) {
            let (uri, service) = key;
            return Err(Error::ProviderExists {
                uri,
                area: service.area,
                service: service.service,
            });
        }

        info!(
            "Registered provider at {} for area {} service {}",
            key.0, service.area, service.service
        );
        addresses.insert(key, address);

        Ok(())
    }

    /// The provider an inbound header is addressed to.
    pub fn lookup(&self, header: &MessageHeader) -> Option<Address> {
        self.addresses
            .read()
            .get(&(header.uri_to.clone(), ServiceKey::of(header)))
            .cloned()
    }

    /// Removes a provider.
    pub fn deregister(&self, uri: &Uri, service: ServiceKey) -> Option<Address> {
        self.addresses.write().remove(&(uri.clone(), service))
    }

    /// Removes every provider hosted at `uri`.
    pub fn deregister_all(&self, uri: &Uri) {
        self.addresses.write().retain(|(hosted, _), _| hosted != uri);
    }
}
