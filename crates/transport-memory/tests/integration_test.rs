//! Integration tests for memory transport

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use mal_transport::{
    ErrorCode, InteractionStage, InteractionType, Message, MessageBody, MessageHeader,
    MessageReceiver, QosProperties, StandardError, TransactionId, Transport, TransportError, Uri,
};
use mal_transport_memory::MemoryTransport;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

enum Event {
    Message(Message),
    TransmitError(MessageHeader, StandardError),
}

struct ChannelReceiver {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl MessageReceiver for ChannelReceiver {
    async fn on_message(&self, message: Message) {
        let _ = self.tx.send(Event::Message(message));
    }

    async fn on_transmit_error(&self, header: MessageHeader, error: StandardError) {
        let _ = self.tx.send(Event::TransmitError(header, error));
    }
}

fn receiver() -> (Arc<ChannelReceiver>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelReceiver { tx }), rx)
}

fn send_message(from: &str, to: &str, raw_id: u64) -> Message {
    let header = MessageHeader {
        uri_from: Uri::new(from),
        uri_to: Uri::new(to),
        authentication_id: Bytes::new(),
        timestamp: Utc::now(),
        transaction_id: TransactionId::from_raw(raw_id),
        interaction_type: InteractionType::Send,
        interaction_stage: InteractionStage::Send,
        service_area: 1,
        area_version: 1,
        service: 1,
        operation: 1,
        is_error: false,
        supplements: BTreeMap::new(),
        qos_properties: QosProperties::new(),
    };
    Message::new(header, MessageBody::Encoded(Bytes::from("payload")))
}

#[tokio::test]
async fn test_memory_delivery_keeps_send_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let client = MemoryTransport::bind("mem://delivery/client").expect("Failed to bind client");
    let server = MemoryTransport::bind("mem://delivery/server").expect("Failed to bind server");
    let (server_receiver, mut server_rx) = receiver();
    server.set_receiver(server_receiver);

    for raw_id in 1..=3 {
        client
            .send_message(send_message(
                "mem://delivery/client",
                "mem://delivery/server",
                raw_id,
            ))
            .await
            .expect("Failed to send");
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        match timeout(Duration::from_secs(1), server_rx.recv())
            .await
            .expect("Timeout")
            .expect("Channel closed")
        {
            Event::Message(message) => received.push(message.header().transaction_id.as_raw()),
            Event::TransmitError(..) => panic!("unexpected transmit error"),
        }
    }

    // One sender, one receiver: send order is kept
    assert_eq!(received, vec![1, 2, 3]);
    info!("Delivered {} messages", received.len());

    client.close().await.expect("Failed to close client");
    server.close().await.expect("Failed to close server");
}

#[tokio::test]
async fn test_unknown_destination_reports_transmit_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let client = MemoryTransport::bind("mem://unknown/client").expect("Failed to bind client");
    let (client_receiver, mut client_rx) = receiver();
    client.set_receiver(client_receiver);

    client
        .send_message(send_message("mem://unknown/client", "mem://unknown/nobody", 7))
        .await
        .expect("Queueing should succeed");

    match timeout(Duration::from_secs(1), client_rx.recv())
        .await
        .expect("Timeout")
        .expect("Channel closed")
    {
        Event::TransmitError(header, error) => {
            assert_eq!(header.transaction_id, TransactionId::from_raw(7));
            assert_eq!(error.code, ErrorCode::DestinationUnknown);
        }
        Event::Message(_) => panic!("expected a transmit error"),
    }

    client.close().await.expect("Failed to close client");
}

#[tokio::test]
async fn test_closed_transport_rejects_sends() {
    let client = MemoryTransport::bind("mem://closed/client").expect("Failed to bind client");
    client.close().await.expect("Failed to close");

    let result = client
        .send_message(send_message("mem://closed/client", "mem://closed/server", 1))
        .await;

    assert_eq!(
        result,
        Err(TransportError::Closed(Uri::new("mem://closed/client")))
    );
    assert!(!MemoryTransport::is_bound(&Uri::new("mem://closed/client")));
}

#[tokio::test]
async fn test_double_bind_is_rejected() {
    let first = MemoryTransport::bind("mem://double").expect("Failed to bind");
    let second = MemoryTransport::bind("mem://double");

    assert!(matches!(second, Err(TransportError::AlreadyBound(_))));

    first.close().await.expect("Failed to close");
    let rebound = MemoryTransport::bind("mem://double").expect("Rebind after close");
    rebound.close().await.expect("Failed to close");
}
