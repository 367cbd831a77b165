//! A simple in-process broker for the pub/sub pattern.
//!
//! Subscriptions are keyed by (consumer URI, subscription id). Every PUBLISH
//! is matched against all subscriptions and fans out as one NOTIFY per
//! subscription with at least one matching update.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mal_transport::{
    EntityKey, ErrorCode, Identifier, MessageBody, MessageHeader, StandardError, Update, Uri,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::handler::InteractionHandler;
use crate::provider::ProviderInteraction;

struct BrokerSubscription {
    keys: Vec<EntityKey>,
    /// REGISTER header, the notifications answer it
    register: MessageHeader,
}

/// Broker handling REGISTER, DEREGISTER, PUBLISH_REGISTER,
/// PUBLISH_DEREGISTER and PUBLISH.
#[derive(Default)]
pub struct SimpleBroker {
    subscriptions: RwLock<HashMap<(Uri, Identifier), BrokerSubscription>>,
    publishers: RwLock<HashMap<Uri, Vec<EntityKey>>>,
}

impl SimpleBroker {
    /// Creates a broker without subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether `uri` is registered as a publisher.
    pub fn is_publisher(&self, uri: &Uri) -> bool {
        self.publishers.read().contains_key(uri)
    }

    fn notifications(&self, updates: &[Update]) -> Vec<(MessageHeader, Identifier, Vec<Update>)> {
        self.subscriptions
            .read()
            .iter()
            .filter_map(|((_, subscription_id), subscription)| {
                let matching: Vec<Update> = updates
                    .iter()
                    .filter(|update| {
                        subscription
                            .keys
                            .iter()
                            .any(|pattern| key_matches(update.key.as_str(), pattern.as_str()))
                    })
                    .cloned()
                    .collect();
                (!matching.is_empty()).then(|| {
                    (
                        subscription.register.clone(),
                        subscription_id.clone(),
                        matching,
                    )
                })
            })
            .collect()
    }
}

#[async_trait]
impl InteractionHandler for SimpleBroker {
    async fn handle_register(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        let MessageBody::Register(subscription) = body else {
            return Err(bad_body("REGISTER"));
        };
        let register = interaction.header().clone();

        debug!(
            "Subscription {} from {} on {:?}",
            subscription.id, register.uri_from, subscription.keys
        );
        self.subscriptions.write().insert(
            (register.uri_from.clone(), subscription.id),
            BrokerSubscription {
                keys: subscription.keys,
                register,
            },
        );

        Ok(())
    }

    async fn handle_deregister(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        let MessageBody::Deregister(subscription_ids) = body else {
            return Err(bad_body("DEREGISTER"));
        };
        let consumer = interaction.header().uri_from.clone();

        let mut subscriptions = self.subscriptions.write();
        for subscription_id in subscription_ids {
            subscriptions.remove(&(consumer.clone(), subscription_id));
        }

        Ok(())
    }

    async fn handle_publish_register(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        let MessageBody::PublishRegister(keys) = body else {
            return Err(bad_body("PUBLISH_REGISTER"));
        };

        self.publishers
            .write()
            .insert(interaction.header().uri_from.clone(), keys);

        Ok(())
    }

    async fn handle_publish_deregister(
        &self,
        interaction: Arc<ProviderInteraction>,
        _body: MessageBody,
    ) -> Result<(), StandardError> {
        self.publishers.write().remove(&interaction.header().uri_from);
        Ok(())
    }

    async fn handle_publish(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        let MessageBody::Publish(updates) = body else {
            return Err(bad_body("PUBLISH"));
        };
        let publisher = &interaction.header().uri_from;

        {
            let publishers = self.publishers.read();
            let Some(registered) = publishers.get(publisher) else {
                return Err(StandardError::with_info(
                    ErrorCode::Unknown,
                    format!("{publisher} is not a registered publisher"),
                ));
            };
            if let Some(update) = updates.iter().find(|update| {
                !registered
                    .iter()
                    .any(|key| key_matches(update.key.as_str(), key.as_str()))
            }) {
                return Err(StandardError::with_info(
                    ErrorCode::Unknown,
                    format!("key {} was not registered", update.key.as_str()),
                ));
            }
        }

        for (register, subscription_id, matching) in self.notifications(&updates) {
            let consumer = register.uri_from.clone();
            if let Err(e) = interaction
                .send_notify(&register, subscription_id, matching)
                .await
            {
                warn!("Failed to notify {}: {}", consumer, e);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for SimpleBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleBroker")
            .field("subscriptions", &self.subscriptions.read().len())
            .field("publishers", &self.publishers.read().len())
            .finish()
    }
}

fn bad_body(stage: &str) -> StandardError {
    StandardError::with_info(ErrorCode::BadEncoding, format!("unexpected {stage} body"))
}

/// Matches a dot-separated key against a pattern.
///
/// `*` matches exactly one token, a trailing `>` matches one or more
/// remaining tokens.
pub fn key_matches(key: &str, pattern: &str) -> bool {
    let mut key_tokens = key.split('.');
    let mut pattern_tokens = pattern.split('.');

    loop {
        match (pattern_tokens.next(), key_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(token)) if expected == token => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
