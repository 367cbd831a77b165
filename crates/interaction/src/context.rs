//! The interaction context ties the engine together.

use std::sync::Arc;

use bytes::Bytes;
use mal_transport::{InteractionType, Transport, Uri};
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::access::{AccessControl, AllowAll};
use crate::address::{Address, AddressRegistry, ServiceKey};
use crate::callback::CallbackQueue;
use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::Result;
use crate::handler::InteractionHandler;
use crate::publisher::Publisher;
use crate::pubsub::PubSubTables;
use crate::receive::EndpointReceiver;
use crate::send::{MessageDetails, Operation};
use crate::table::InteractionTable;

/// State shared by the facades, the receive path and provider tasks.
pub(crate) struct ContextInner {
    pub(crate) config: Config,
    pub(crate) table: InteractionTable,
    pub(crate) pubsub: PubSubTables,
    pub(crate) addresses: AddressRegistry,
    pub(crate) access_control: Arc<dyn AccessControl>,
    /// NOTIFY and publish-error callbacks, in arrival order.
    pub(crate) pubsub_callbacks: Arc<CallbackQueue>,
    pub(crate) task_tracker: TaskTracker,
}

/// Owns the consumer interaction table, the timeout supervisor, the pub/sub
/// tables and the provider registry of one application.
///
/// Transports are attached to a context, which installs its receive path as
/// their [`MessageReceiver`](mal_transport::MessageReceiver). Attached
/// transports only hold a weak reference back, so dropping the context stops
/// dispatch.
#[derive(Clone)]
pub struct InteractionContext {
    inner: Arc<ContextInner>,
}

impl InteractionContext {
    /// Creates a context letting every outbound message through.
    pub fn new(config: Config) -> Self {
        Self::with_access_control(config, Arc::new(AllowAll))
    }

    /// Creates a context checking outbound messages with `access_control`.
    pub fn with_access_control(config: Config, access_control: Arc<dyn AccessControl>) -> Self {
        info!(
            "Creating interaction context (timeout: {:?})",
            config.interaction_timeout()
        );

        Self {
            inner: Arc::new(ContextInner {
                table: InteractionTable::new(config.interaction_timeout()),
                config,
                pubsub: PubSubTables::new(),
                addresses: AddressRegistry::new(),
                access_control,
                pubsub_callbacks: Arc::new(CallbackQueue::new()),
                task_tracker: TaskTracker::new(),
            }),
        }
    }

    /// Routes the inbound traffic of `transport` through this context.
    pub fn attach(&self, transport: &Arc<dyn Transport>) {
        transport.set_receiver(Arc::new(EndpointReceiver::new(transport, &self.inner)));
    }

    /// Hosts a provider for `service` at the URI of `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderExists`](crate::Error::ProviderExists) if one
    /// is already hosted there.
    pub fn register_provider(
        &self,
        transport: Arc<dyn Transport>,
        service: ServiceKey,
        authentication_id: Bytes,
        handler: Arc<dyn InteractionHandler>,
    ) -> Result<()> {
        self.attach(&transport);
        self.inner.addresses.register(
            service,
            Address {
                transport,
                authentication_id,
                handler,
            },
        )
    }

    /// Stops hosting a provider. Returns whether one was registered.
    pub fn deregister_provider(&self, uri: &Uri, service: ServiceKey) -> bool {
        self.inner.addresses.deregister(uri, service).is_some()
    }

    /// A consumer sending from `details.transport` to `details.uri_to`.
    pub fn consumer(&self, details: MessageDetails) -> Consumer {
        self.attach(&details.transport);
        Consumer::new(self.inner.clone(), details)
    }

    /// A publisher of `operation` sending to the broker at `details.uri_to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongInteractionType`](crate::Error::WrongInteractionType)
    /// unless `operation` is a pub/sub operation.
    pub fn publisher(&self, details: MessageDetails, operation: Operation) -> Result<Publisher> {
        operation.expect(InteractionType::PubSub)?;
        self.attach(&details.transport);
        Ok(Publisher::new(self.inner.clone(), details, operation))
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The consumer interaction table.
    pub fn table(&self) -> &InteractionTable {
        &self.inner.table
    }

    /// The pub/sub listener tables.
    pub fn pubsub(&self) -> &PubSubTables {
        &self.inner.pubsub
    }

    /// Stops the timeout supervisor and waits for running provider handlers
    /// and queued listener calls.
    pub async fn shutdown(&self) {
        info!("Shutting down interaction context");
        self.inner.table.shutdown().await;
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;
    }
}

impl std::fmt::Debug for InteractionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionContext")
            .field("config", &self.inner.config)
            .field("table", &self.inner.table)
            .field("pubsub", &self.inner.pubsub)
            .finish_non_exhaustive()
    }
}
