//! In-memory transport implementation for testing
//!
//! This transport routes messages between endpoints within the same process,
//! keyed by URI. Each endpoint owns an inbox drained by one delivery task, so
//! messages from one sender reach a receiver in the order they were sent,
//! while different endpoints deliver concurrently.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use mal_transport::{
    ErrorCode, Message, MessageHeader, MessageReceiver, StandardError, Transport, TransportError,
    Uri,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Global registry of bound memory endpoints for cross-endpoint routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<Uri, MemoryRoute>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

/// Work item queued in an endpoint inbox
enum Inbound {
    Message(Message),
    TransmitError(MessageHeader, StandardError),
    Shutdown,
}

/// Shared state of one bound endpoint, reachable from the registry
#[derive(Clone)]
struct MemoryRoute {
    inbox: flume::Sender<Inbound>,
    receiver: Arc<RwLock<Option<Arc<dyn MessageReceiver>>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryRoute {
    fn receiver(&self) -> Option<Arc<dyn MessageReceiver>> {
        self.receiver.read().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Memory transport endpoint bound to one URI
pub struct MemoryTransport {
    uri: Uri,
    route: MemoryRoute,
}

impl MemoryTransport {
    /// Binds a new endpoint at `uri` and starts its delivery task.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyBound`] if another endpoint holds the
    /// URI, or [`TransportError::Transmission`] outside a tokio runtime.
    pub fn bind(uri: impl Into<Uri>) -> Result<Arc<Self>, TransportError> {
        let uri = uri.into();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Transmission(format!("no tokio runtime: {e}")))?;

        let (inbox, inbox_rx) = flume::unbounded();
        let route = MemoryRoute {
            inbox,
            receiver: Arc::new(RwLock::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        };

        match GLOBAL_REGISTRY.entry(uri.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::AlreadyBound(uri));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(route.clone());
            }
        }

        runtime.spawn(deliver_loop(uri.clone(), route.receiver.clone(), inbox_rx));

        info!("Memory endpoint bound at {}", uri);

        Ok(Arc::new(Self { uri, route }))
    }

    /// Whether an endpoint is currently bound at `uri`
    pub fn is_bound(uri: &Uri) -> bool {
        GLOBAL_REGISTRY.contains_key(uri)
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }

    fn report_transmit_error(&self, header: MessageHeader, error: StandardError) {
        if self
            .route
            .inbox
            .send(Inbound::TransmitError(header, error))
            .is_err()
        {
            debug!("Inbox of {} is gone, dropping transmit error", self.uri);
        }
    }
}

/// Drains one endpoint inbox until the endpoint is closed
async fn deliver_loop(
    uri: Uri,
    receiver: Arc<RwLock<Option<Arc<dyn MessageReceiver>>>>,
    inbox: flume::Receiver<Inbound>,
) {
    while let Ok(inbound) = inbox.recv_async().await {
        let current = receiver.read().clone();
        match (inbound, current) {
            (Inbound::Shutdown, _) => break,
            (Inbound::Message(message), Some(receiver)) => receiver.on_message(message).await,
            (Inbound::TransmitError(header, error), Some(receiver)) => {
                receiver.on_transmit_error(header, error).await;
            }
            (_, None) => warn!("Endpoint {} has no receiver, dropping inbound item", uri),
        }
    }

    debug!("Delivery task for {} stopped", uri);
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("uri", &self.uri)
            .field("closed", &self.route.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn send_message(&self, message: Message) -> Result<(), TransportError> {
        if self.route.is_closed() {
            return Err(TransportError::Closed(self.uri.clone()));
        }

        let destination = message.header().uri_to.clone();

        debug!(
            "Memory endpoint {} queueing {} for {}",
            self.uri,
            message.header().interaction_stage,
            destination
        );

        let target = GLOBAL_REGISTRY
            .get(&destination)
            .map(|route| route.value().clone())
            .filter(|route| !route.is_closed());

        match target {
            Some(route) => {
                if let Err(flume::SendError(Inbound::Message(message))) =
                    route.inbox.send(Inbound::Message(message))
                {
                    let (header, _) = message.into_parts();
                    self.report_transmit_error(
                        header,
                        StandardError::with_info(
                            ErrorCode::DestinationLost,
                            destination.to_string(),
                        ),
                    );
                }
            }
            None => {
                debug!("No memory endpoint bound at {}", destination);
                let (header, _) = message.into_parts();
                self.report_transmit_error(
                    header,
                    StandardError::with_info(ErrorCode::DestinationUnknown, destination.to_string()),
                );
            }
        }

        Ok(())
    }

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        *self.route.receiver.write() = Some(receiver);
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory endpoint {}", self.uri);
        if self.route.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Only unregister if the registry still points at this endpoint
        GLOBAL_REGISTRY.remove_if(&self.uri, |_, route| {
            Arc::ptr_eq(&route.closed, &self.route.closed)
        });

        let _ = self.route.inbox.send(Inbound::Shutdown);

        Ok(())
    }
}
