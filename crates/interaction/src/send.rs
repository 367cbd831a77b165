//! Outbound message construction and dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use mal_transport::{
    InteractionStage, InteractionType, Message, MessageBody, MessageHeader, QosProperties,
    TransactionId, Transport, Uri,
};
use tracing::{debug, instrument};

use crate::access::AccessControl;
use crate::context::ContextInner;
use crate::error::{Error, Result};
use crate::handler::InteractionListener;

/// Where and how a consumer or publisher sends its messages.
#[derive(Clone)]
pub struct MessageDetails {
    /// Local endpoint the messages leave from.
    pub transport: Arc<dyn Transport>,
    /// Destination endpoint.
    pub uri_to: Uri,
    /// Credential of the sender.
    pub authentication_id: Bytes,
    /// Quality-of-service properties passed through to the transport.
    pub qos_properties: QosProperties,
    /// Transport supplements.
    pub supplements: BTreeMap<String, String>,
}

impl MessageDetails {
    /// Details with no credential, QoS properties or supplements.
    pub fn new(transport: Arc<dyn Transport>, uri_to: impl Into<Uri>) -> Self {
        Self {
            transport,
            uri_to: uri_to.into(),
            authentication_id: Bytes::new(),
            qos_properties: QosProperties::new(),
            supplements: BTreeMap::new(),
        }
    }

    /// Sets the credential.
    #[must_use]
    pub fn with_authentication_id(mut self, authentication_id: impl Into<Bytes>) -> Self {
        self.authentication_id = authentication_id.into();
        self
    }

    /// Sets the QoS properties.
    #[must_use]
    pub fn with_qos_properties(mut self, qos_properties: QosProperties) -> Self {
        self.qos_properties = qos_properties;
        self
    }

    /// Sets the transport supplements.
    #[must_use]
    pub fn with_supplements(mut self, supplements: BTreeMap<String, String>) -> Self {
        self.supplements = supplements;
        self
    }
}

impl std::fmt::Debug for MessageDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDetails")
            .field("uri_from", self.transport.uri())
            .field("uri_to", &self.uri_to)
            .field("qos_properties", &self.qos_properties)
            .finish_non_exhaustive()
    }
}

/// Identity of a service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    /// Service area number.
    pub service_area: u16,
    /// Service area version.
    pub area_version: u8,
    /// Service number within the area.
    pub service: u16,
    /// Operation number within the service.
    pub operation: u16,
    /// Pattern the operation follows.
    pub interaction_type: InteractionType,
}

impl Operation {
    /// Creates an operation identity.
    pub const fn new(
        service_area: u16,
        area_version: u8,
        service: u16,
        operation: u16,
        interaction_type: InteractionType,
    ) -> Self {
        Self {
            service_area,
            area_version,
            service,
            operation,
            interaction_type,
        }
    }

    /// Fails unless the operation follows `expected`.
    pub(crate) fn expect(&self, expected: InteractionType) -> Result<()> {
        if self.interaction_type == expected {
            Ok(())
        } else {
            Err(Error::WrongInteractionType {
                expected,
                actual: self.interaction_type,
            })
        }
    }

    pub(crate) fn header(
        &self,
        details: &MessageDetails,
        transaction_id: TransactionId,
        stage: InteractionStage,
    ) -> MessageHeader {
        MessageHeader {
            uri_from: details.transport.uri().clone(),
            uri_to: details.uri_to.clone(),
            authentication_id: details.authentication_id.clone(),
            timestamp: Utc::now(),
            transaction_id,
            interaction_type: self.interaction_type,
            interaction_stage: stage,
            service_area: self.service_area,
            area_version: self.area_version,
            service: self.service,
            operation: self.operation,
            is_error: false,
            supplements: details.supplements.clone(),
            qos_properties: details.qos_properties.clone(),
        }
    }
}

/// Builds a message, runs it through access control and hands it to the
/// transport. Nothing is retried.
pub(crate) async fn transmit(
    transport: &dyn Transport,
    access_control: &dyn AccessControl,
    header: MessageHeader,
    body: MessageBody,
) -> Result<()> {
    let message = transport.create_message(header, body)?;
    let message = access_control.check(message).map_err(Error::AccessDenied)?;
    transport.send_message(message).await?;
    Ok(())
}

/// Outcome of starting an interaction.
#[derive(Debug)]
pub(crate) struct Initiated {
    pub transaction_id: TransactionId,
    pub reply: Option<Message>,
}

impl ContextInner {
    /// Starts a consumer interaction and, for synchronous calls, waits for
    /// its first reply.
    #[instrument(skip(self, details, body, listener), fields(uri_to = %details.uri_to))]
    pub(crate) async fn initiate(
        &self,
        details: &MessageDetails,
        operation: &Operation,
        stage: InteractionStage,
        body: MessageBody,
        synchronous: bool,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Result<Initiated> {
        let transaction_id = if synchronous {
            self.table.create_synchronous_transaction(stage, listener)?
        } else {
            self.table.create_transaction(stage, listener)?
        };
        let header = operation.header(details, transaction_id, stage);

        if let Err(e) = transmit(
            details.transport.as_ref(),
            self.access_control.as_ref(),
            header,
            body,
        )
        .await
        {
            debug!(transaction_id = %transaction_id, "Initiating message not sent: {}", e);
            self.table.abandon(transaction_id);
            return Err(e);
        }

        let reply = if synchronous {
            self.table.wait_for_response(transaction_id).await?
        } else {
            None
        };

        Ok(Initiated {
            transaction_id,
            reply,
        })
    }

    /// Like [`initiate`](Self::initiate) for a synchronous call that must
    /// produce a reply.
    pub(crate) async fn call(
        &self,
        details: &MessageDetails,
        operation: &Operation,
        stage: InteractionStage,
        body: MessageBody,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Result<Message> {
        let initiated = self
            .initiate(details, operation, stage, body, true, listener)
            .await?;
        initiated.reply.ok_or_else(|| {
            Error::Internal(format!(
                "synchronous {stage} in transaction {} produced no reply",
                initiated.transaction_id
            ))
        })
    }
}
