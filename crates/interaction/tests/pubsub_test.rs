//! Publish/subscribe through the simple broker over the memory transport

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use common::{Event, Recorder, bind, recording_listener};
use mal_interaction::{
    Config, Consumer, InteractionContext, MessageDetails, Operation, Publisher, ServiceKey,
    SimpleBroker,
};
use mal_transport::{
    EntityKey, ErrorCode, Identifier, InteractionStage, InteractionType, Message, MessageBody,
    MessageHeader, QosProperties, StandardError, Subscription, TransactionId, Transport, Update,
    Uri,
};

const MONITORING: Operation = Operation::new(2, 1, 1, 1, InteractionType::PubSub);

struct Deployment {
    broker_transport: Arc<dyn Transport>,
    consumer_uri: Uri,
    consumer: Consumer,
    publisher: Publisher,
    context: InteractionContext,
    _broker_context: InteractionContext,
}

fn deploy(name: &str) -> Deployment {
    let _ = tracing_subscriber::fmt::try_init();

    let broker_uri = format!("mem://{name}/broker");
    let broker_transport = bind(&broker_uri);
    let broker_context = InteractionContext::new(Config::default());
    broker_context
        .register_provider(
            broker_transport.clone(),
            ServiceKey::new(2, 1),
            Bytes::new(),
            Arc::new(SimpleBroker::new()),
        )
        .unwrap();

    let context = InteractionContext::new(Config::default());
    let consumer_transport = bind(&format!("mem://{name}/consumer"));
    let consumer_uri = consumer_transport.uri().clone();
    let consumer = context.consumer(MessageDetails::new(consumer_transport, broker_uri.clone()));
    let publisher = context
        .publisher(
            MessageDetails::new(bind(&format!("mem://{name}/publisher")), broker_uri),
            MONITORING,
        )
        .unwrap();

    Deployment {
        broker_transport,
        consumer_uri,
        consumer,
        publisher,
        context,
        _broker_context: broker_context,
    }
}

fn subscription(id: &str, keys: &[&str]) -> Subscription {
    Subscription {
        id: Identifier::new(id),
        keys: keys.iter().map(|key| EntityKey::new(*key)).collect(),
    }
}

fn update(key: &str, value: &'static [u8]) -> Update {
    Update {
        key: EntityKey::new(key),
        value: Bytes::from_static(value),
    }
}

/// A NOTIFY sent straight from the broker endpoint, bypassing the broker
fn raw_notify(from: &Uri, to: &Uri, body: MessageBody, error: bool) -> Message {
    let header = MessageHeader {
        uri_from: from.clone(),
        uri_to: to.clone(),
        authentication_id: Bytes::new(),
        timestamp: Utc::now(),
        transaction_id: TransactionId::from_raw(77),
        interaction_type: InteractionType::PubSub,
        interaction_stage: InteractionStage::Notify,
        service_area: 2,
        area_version: 1,
        service: 1,
        operation: 1,
        is_error: error,
        supplements: BTreeMap::new(),
        qos_properties: QosProperties::new(),
    };
    Message::new(header, body)
}

fn expect_notify(event: Event, subscription: &str) -> Vec<Update> {
    match event {
        Event::Stage(message) => match message.into_parts().1 {
            MessageBody::Notify {
                subscription_id,
                updates,
            } => {
                assert_eq!(subscription_id, Identifier::new(subscription));
                updates
            }
            other => panic!("expected a notify body, got {other:?}"),
        },
        other => panic!("expected a notification, got {other:?}"),
    }
}

async fn register_publisher(deployment: &Deployment, keys: &[&str]) -> Recorder {
    let (listener, recorder) = recording_listener();
    let ack = deployment
        .publisher
        .register(keys.iter().map(|key| EntityKey::new(*key)).collect(), listener)
        .await
        .unwrap();
    assert_eq!(
        ack.header().interaction_stage,
        InteractionStage::PublishRegisterAck
    );
    recorder
}

#[tokio::test]
async fn test_notify_reaches_only_matching_subscription() {
    let deployment = deploy("pubsub-routing");
    let (listener_a, mut recorder_a) = recording_listener();
    let (listener_b, mut recorder_b) = recording_listener();

    let ack = deployment
        .consumer
        .register(&MONITORING, subscription("A", &["sat.power.*"]), listener_a)
        .await
        .unwrap();
    assert_eq!(ack.header().interaction_stage, InteractionStage::RegisterAck);
    deployment
        .consumer
        .register(&MONITORING, subscription("B", &["sat.thermal.>"]), listener_b)
        .await
        .unwrap();
    let _publisher_errors = register_publisher(&deployment, &["sat.>"]).await;

    deployment
        .publisher
        .publish(vec![
            update("sat.power.voltage", b"28.1"),
            update("sat.mode", b"nominal"),
        ])
        .await
        .unwrap();

    let updates = expect_notify(recorder_a.next().await, "A");
    assert_eq!(updates, vec![update("sat.power.voltage", b"28.1")]);
    recorder_b.assert_silent(Duration::from_millis(100)).await;

    // Deregistered subscriptions are forgotten on both sides
    let ack = deployment
        .consumer
        .deregister(&MONITORING, vec![Identifier::new("A")])
        .await
        .unwrap();
    assert_eq!(ack.header().interaction_stage, InteractionStage::DeregisterAck);

    deployment
        .publisher
        .publish(vec![
            update("sat.power.current", b"3.2"),
            update("sat.thermal.panel.left", b"-12"),
        ])
        .await
        .unwrap();

    let updates = expect_notify(recorder_b.next().await, "B");
    assert_eq!(updates, vec![update("sat.thermal.panel.left", b"-12")]);
    recorder_a.assert_silent(Duration::from_millis(100)).await;

    // A stale NOTIFY for A is dropped while B stays resolvable
    deployment
        .broker_transport
        .send_message(raw_notify(
            deployment.broker_transport.uri(),
            &deployment.consumer_uri,
            MessageBody::Notify {
                subscription_id: Identifier::new("A"),
                updates: vec![update("sat.power.voltage", b"0")],
            },
            false,
        ))
        .await
        .unwrap();
    recorder_a.assert_silent(Duration::from_millis(100)).await;
    assert!(
        deployment
            .context
            .pubsub()
            .get_notify_listener(&deployment.consumer_uri, &Identifier::new("A"))
            .is_none()
    );
    assert!(
        deployment
            .context
            .pubsub()
            .get_notify_listener(&deployment.consumer_uri, &Identifier::new("B"))
            .is_some()
    );
}

#[tokio::test]
async fn test_unregistered_key_is_reported_to_publisher() {
    let deployment = deploy("pubsub-unknown-key");
    let mut publisher_errors = register_publisher(&deployment, &["sat.power.*"]).await;

    let transaction_id = deployment
        .publisher
        .publish(vec![update("ground.link", b"down")])
        .await
        .unwrap();

    match publisher_errors.next().await {
        Event::Error {
            transaction_id: id,
            stage,
            error,
        } => {
            assert_eq!(id, transaction_id);
            assert_eq!(stage, InteractionStage::Publish);
            assert_eq!(error.code, ErrorCode::Unknown);
        }
        other => panic!("expected a publish error, got {other:?}"),
    }

    let ack = deployment.publisher.deregister().await.unwrap();
    assert_eq!(
        ack.header().interaction_stage,
        InteractionStage::PublishDeregisterAck
    );
}

#[tokio::test]
async fn test_async_register_delivers_ack_then_notifications() {
    let deployment = deploy("pubsub-async");
    let (listener, mut recorder) = recording_listener();

    deployment
        .consumer
        .async_register(&MONITORING, subscription("S", &["sat.>"]), listener)
        .await
        .unwrap();
    assert_eq!(recorder.next().await.stage(), InteractionStage::RegisterAck);

    let _publisher_errors = register_publisher(&deployment, &["sat.>"]).await;
    deployment
        .publisher
        .publish(vec![update("sat.mode", b"safe")])
        .await
        .unwrap();

    let updates = expect_notify(recorder.next().await, "S");
    assert_eq!(updates, vec![update("sat.mode", b"safe")]);
}

#[tokio::test]
async fn test_notify_error_fans_out_to_every_subscription() {
    let deployment = deploy("pubsub-fan-out");
    let (listener_a, mut recorder_a) = recording_listener();
    let (listener_b, mut recorder_b) = recording_listener();
    deployment
        .consumer
        .register(&MONITORING, subscription("A", &["a.>"]), listener_a)
        .await
        .unwrap();
    deployment
        .consumer
        .register(&MONITORING, subscription("B", &["b.>"]), listener_b)
        .await
        .unwrap();

    deployment
        .broker_transport
        .send_message(raw_notify(
            deployment.broker_transport.uri(),
            &deployment.consumer_uri,
            MessageBody::Error(StandardError::new(ErrorCode::Shutdown)),
            true,
        ))
        .await
        .unwrap();

    for recorder in [&mut recorder_a, &mut recorder_b] {
        let event = recorder.next().await;
        assert_eq!(event.stage(), InteractionStage::Notify);
        assert_eq!(event.error_code(), Some(ErrorCode::Shutdown));
    }
}
