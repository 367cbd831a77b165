//! Message header, body and the typed publish/subscribe payloads.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interaction::{InteractionStage, InteractionType};
use crate::standard_error::StandardError;
use crate::types::{Identifier, TransactionId, Uri};

/// Quality-of-service properties, opaque to the middleware.
pub type QosProperties = BTreeMap<String, String>;

/// Every field a transport must carry for the interaction engine to work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// URI of the sending endpoint.
    pub uri_from: Uri,
    /// URI of the destination endpoint.
    pub uri_to: Uri,
    /// Credential of the sender.
    pub authentication_id: Bytes,
    /// Creation time of the message.
    pub timestamp: DateTime<Utc>,
    /// Interaction this message belongs to.
    pub transaction_id: TransactionId,
    /// Interaction pattern.
    pub interaction_type: InteractionType,
    /// Stage within the pattern.
    pub interaction_stage: InteractionStage,
    /// Service area number.
    pub service_area: u16,
    /// Service area version.
    pub area_version: u8,
    /// Service number within the area.
    pub service: u16,
    /// Operation number within the service.
    pub operation: u16,
    /// Whether the body is an error.
    pub is_error: bool,
    /// Transport supplements.
    pub supplements: BTreeMap<String, String>,
    /// Quality-of-service properties.
    pub qos_properties: QosProperties,
}

impl MessageHeader {
    /// Header answering `self` at `stage`: addresses swapped, same service and
    /// transaction.
    pub fn reply(&self, stage: InteractionStage, is_error: bool) -> Self {
        Self {
            uri_from: self.uri_to.clone(),
            uri_to: self.uri_from.clone(),
            authentication_id: self.authentication_id.clone(),
            timestamp: Utc::now(),
            transaction_id: self.transaction_id,
            interaction_type: self.interaction_type,
            interaction_stage: stage,
            service_area: self.service_area,
            area_version: self.area_version,
            service: self.service,
            operation: self.operation,
            is_error,
            supplements: self.supplements.clone(),
            qos_properties: self.qos_properties.clone(),
        }
    }

    /// True when the stage belongs to the declared interaction type.
    pub fn is_consistent(&self) -> bool {
        self.interaction_stage.interaction_type() == self.interaction_type
    }
}

/// Key pattern or concrete key of published entities.
///
/// Keys are dot-separated tokens. In subscriptions `*` matches exactly one
/// token and a trailing `>` matches the remaining tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    /// Creates a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A subscription sent by a consumer to a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id, unique per consumer endpoint.
    pub id: Identifier,
    /// Key patterns selecting the updates of interest.
    pub keys: Vec<EntityKey>,
}

/// One published entity update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Key of the updated entity.
    pub key: EntityKey,
    /// Pre-encoded update value.
    pub value: Bytes,
}

/// Message body, either typed or pre-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// No body.
    Empty,
    /// Body elements, each already encoded by the service layer.
    Elements(Vec<Bytes>),
    /// Whole body already encoded.
    Encoded(Bytes),
    /// Error body.
    Error(StandardError),
    /// REGISTER body.
    Register(Subscription),
    /// DEREGISTER body.
    Deregister(Vec<Identifier>),
    /// PUBLISH_REGISTER body.
    PublishRegister(Vec<EntityKey>),
    /// PUBLISH body.
    Publish(Vec<Update>),
    /// NOTIFY body.
    Notify {
        /// Subscription being notified.
        subscription_id: Identifier,
        /// Matching updates.
        updates: Vec<Update>,
    },
}

/// An immutable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: MessageHeader,
    body: MessageBody,
}

impl Message {
    /// Assembles a message.
    pub const fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self { header, body }
    }

    /// Error message answering `header` at `return_stage`.
    pub fn error_reply(
        header: &MessageHeader,
        return_stage: InteractionStage,
        error: StandardError,
    ) -> Self {
        Self::new(header.reply(return_stage, true), MessageBody::Error(error))
    }

    /// The header.
    pub const fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// The body.
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Splits the message into its parts.
    pub fn into_parts(self) -> (MessageHeader, MessageBody) {
        (self.header, self.body)
    }

    /// Returns the carried error if this is an error message.
    ///
    /// Error messages with a malformed body yield an `INTERNAL` error so the
    /// receiver never mistakes them for normal replies.
    pub fn error(&self) -> Option<StandardError> {
        if !self.header.is_error {
            return None;
        }
        match &self.body {
            MessageBody::Error(error) => Some(error.clone()),
            _ => Some(StandardError::internal("error message without error body")),
        }
    }
}
