//! Publish/subscribe routing tables.
//!
//! Maps publisher endpoints to the listener receiving their publish errors,
//! and (consumer endpoint, subscription id) pairs to the listener receiving
//! NOTIFY deliveries. Lookups return `None` instead of failing so the receive
//! path can drop stale notifications without disturbing other traffic.

use std::collections::HashMap;
use std::sync::Arc;

use mal_transport::{Identifier, Uri};
use parking_lot::RwLock;
use tracing::debug;

use crate::handler::InteractionListener;

/// Listener registrations for publishers and subscribers.
#[derive(Default)]
pub struct PubSubTables {
    /// Publisher URI -> publish error listener
    publishers: RwLock<HashMap<Uri, Arc<dyn InteractionListener>>>,

    /// Consumer URI -> subscription id -> notify listener
    subscriptions: RwLock<HashMap<Uri, HashMap<Identifier, Arc<dyn InteractionListener>>>>,
}

impl PubSubTables {
    /// Creates empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the publish error listener of `uri`, replacing any previous one.
    pub fn register_publish_listener(&self, uri: Uri, listener: Arc<dyn InteractionListener>) {
        debug!("Registered publish listener for {}", uri);
        self.publishers.write().insert(uri, listener);
    }

    /// The publish error listener of `uri`.
    pub fn get_publish_listener(&self, uri: &Uri) -> Option<Arc<dyn InteractionListener>> {
        self.publishers.read().get(uri).cloned()
    }

    /// Removes the publish error listener of `uri`.
    pub fn remove_publish_listener(&self, uri: &Uri) -> Option<Arc<dyn InteractionListener>> {
        debug!("Removed publish listener for {}", uri);
        self.publishers.write().remove(uri)
    }

    /// Sets the notify listener of one subscription.
    pub fn register_notify_listener(
        &self,
        uri: Uri,
        subscription_id: Identifier,
        listener: Arc<dyn InteractionListener>,
    ) {
        debug!("Registered notify listener {} at {}", subscription_id, uri);
        self.subscriptions
            .write()
            .entry(uri)
            .or_default()
            .insert(subscription_id, listener);
    }

    /// The notify listener of one subscription.
    pub fn get_notify_listener(
        &self,
        uri: &Uri,
        subscription_id: &Identifier,
    ) -> Option<Arc<dyn InteractionListener>> {
        self.subscriptions
            .read()
            .get(uri)
            .and_then(|listeners| listeners.get(subscription_id))
            .cloned()
    }

    /// Every notify listener registered at `uri`, with its subscription id.
    pub fn get_notify_listeners(&self, uri: &Uri) -> Vec<(Identifier, Arc<dyn InteractionListener>)> {
        self.subscriptions
            .read()
            .get(uri)
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|(id, listener)| (id.clone(), listener.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the listed subscriptions of `uri`. The URI entry goes away
    /// with its last subscription.
    pub fn deregister_notify_listeners(&self, uri: &Uri, subscription_ids: &[Identifier]) {
        let mut subscriptions = self.subscriptions.write();

        if let Some(listeners) = subscriptions.get_mut(uri) {
            for subscription_id in subscription_ids {
                listeners.remove(subscription_id);
            }
            if listeners.is_empty() {
                subscriptions.remove(uri);
            }
        }

        debug!("Deregistered {:?} at {}", subscription_ids, uri);
    }

    /// Removes every subscription of `uri`.
    pub fn remove_notify_listeners(&self, uri: &Uri) {
        debug!("Removed all notify listeners at {}", uri);
        self.subscriptions.write().remove(uri);
    }

    /// Whether any subscription is registered at `uri`.
    pub fn has_notify_listeners(&self, uri: &Uri) -> bool {
        self.subscriptions.read().contains_key(uri)
    }
}

impl std::fmt::Debug for PubSubTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubTables")
            .field("publishers", &self.publishers.read().len())
            .field("subscribed_uris", &self.subscriptions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mal_transport::{InteractionStage, Message, StandardError, TransactionId};

    struct NullListener;

    #[async_trait]
    impl InteractionListener for NullListener {
        async fn stage_received(&self, _message: Message) {}

        async fn stage_error_received(
            &self,
            _transaction_id: TransactionId,
            _stage: InteractionStage,
            _error: StandardError,
        ) {
        }
    }

    #[test]
    fn test_notify_listener_round_trip() {
        let tables = PubSubTables::new();
        let uri = Uri::new("mem://consumer");
        let listener_a: Arc<dyn InteractionListener> = Arc::new(NullListener);
        let listener_b: Arc<dyn InteractionListener> = Arc::new(NullListener);

        tables.register_notify_listener(uri.clone(), "A".into(), listener_a.clone());
        tables.register_notify_listener(uri.clone(), "B".into(), listener_b.clone());

        let found = tables.get_notify_listener(&uri, &"A".into()).unwrap();
        assert!(Arc::ptr_eq(&found, &listener_a));

        tables.deregister_notify_listeners(&uri, &["A".into()]);

        assert!(tables.get_notify_listener(&uri, &"A".into()).is_none());
        let found = tables.get_notify_listener(&uri, &"B".into()).unwrap();
        assert!(Arc::ptr_eq(&found, &listener_b));
    }

    #[test]
    fn test_last_deregistration_drops_uri_entry() {
        let tables = PubSubTables::new();
        let uri = Uri::new("mem://consumer");

        tables.register_notify_listener(uri.clone(), "A".into(), Arc::new(NullListener));
        tables.register_notify_listener(uri.clone(), "B".into(), Arc::new(NullListener));
        assert_eq!(tables.get_notify_listeners(&uri).len(), 2);

        tables.deregister_notify_listeners(&uri, &["A".into(), "B".into()]);

        assert!(!tables.has_notify_listeners(&uri));
        assert!(tables.get_notify_listeners(&uri).is_empty());
    }

    #[test]
    fn test_publish_listener_is_replaced() {
        let tables = PubSubTables::new();
        let uri = Uri::new("mem://publisher");
        let first: Arc<dyn InteractionListener> = Arc::new(NullListener);
        let second: Arc<dyn InteractionListener> = Arc::new(NullListener);

        tables.register_publish_listener(uri.clone(), first);
        tables.register_publish_listener(uri.clone(), second.clone());

        assert!(Arc::ptr_eq(&tables.get_publish_listener(&uri).unwrap(), &second));
        assert!(tables.remove_publish_listener(&uri).is_some());
        assert!(tables.get_publish_listener(&uri).is_none());
    }
}
