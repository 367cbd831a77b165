//! Shared helpers for interaction engine tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use mal_interaction::InteractionListener;
use mal_transport::{
    ErrorCode, InteractionStage, Message, MessageBody, MessageHeader, QosProperties,
    StandardError, TransactionId, Transport, Uri,
};
use mal_transport_memory::MemoryTransport;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// What a listener observed
#[derive(Debug)]
pub enum Event {
    Stage(Message),
    Error {
        transaction_id: TransactionId,
        stage: InteractionStage,
        error: StandardError,
    },
}

impl Event {
    pub fn stage(&self) -> InteractionStage {
        match self {
            Self::Stage(message) => message.header().interaction_stage,
            Self::Error { stage, .. } => *stage,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Stage(_) => None,
            Self::Error { error, .. } => Some(error.code),
        }
    }
}

/// Listener forwarding everything it receives to a channel
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl InteractionListener for RecordingListener {
    async fn stage_received(&self, message: Message) {
        let _ = self.tx.send(Event::Stage(message));
    }

    async fn stage_error_received(
        &self,
        transaction_id: TransactionId,
        stage: InteractionStage,
        error: StandardError,
    ) {
        let _ = self.tx.send(Event::Error {
            transaction_id,
            stage,
            error,
        });
    }
}

/// Receiving side of a [`RecordingListener`]
pub struct Recorder {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Recorder {
    /// Next event, failing the test after one second
    pub async fn next(&mut self) -> Event {
        timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("Timeout waiting for listener event")
            .expect("Listener channel closed")
    }

    /// Asserts nothing arrives within `wait`
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(event)) = timeout(wait, self.rx.recv()).await {
            panic!("unexpected listener event: {event:?}");
        }
    }

    /// Events already queued
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn recording_listener() -> (Arc<RecordingListener>, Recorder) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingListener { tx }), Recorder { rx })
}

/// Binds a memory endpoint as a trait object
pub fn bind(uri: &str) -> Arc<dyn Transport> {
    MemoryTransport::bind(uri).expect("Failed to bind memory endpoint")
}

/// A reply stage as a provider would send it
pub fn reply(
    transaction_id: TransactionId,
    stage: InteractionStage,
    error: Option<StandardError>,
) -> Message {
    let header = MessageHeader {
        uri_from: Uri::new("mem://test/provider"),
        uri_to: Uri::new("mem://test/consumer"),
        authentication_id: Bytes::new(),
        timestamp: Utc::now(),
        transaction_id,
        interaction_type: stage.interaction_type(),
        interaction_stage: stage,
        service_area: 1,
        area_version: 1,
        service: 1,
        operation: 1,
        is_error: error.is_some(),
        supplements: BTreeMap::new(),
        qos_properties: QosProperties::new(),
    };
    let body = match error {
        Some(error) => MessageBody::Error(error),
        None => MessageBody::Empty,
    };
    Message::new(header, body)
}
