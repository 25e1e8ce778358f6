//! Integration tests for NATS transport
//!
//! Run with: cargo test -p relay-middleware --test nats_integration -- --ignored
//! Requires: docker run -p 4222:4222 nats:latest -js

use bytes::Bytes;
use relay_middleware::{NatsTransport, SubjectBuilder, Transport};

#[tokio::test]
#[ignore]
async fn test_nats_publish_subscribe_roundtrip() {
    let transport = NatsTransport::connect("nats://localhost:4222")
        .await
        .expect("Failed to connect to NATS");

    let subjects = SubjectBuilder::new(Some("test-env"));
    let subject = subjects.platform("HALO", "location");

    let mut sub = transport
        .subscribe(&subject)
        .await
        .expect("Failed to subscribe");

    transport
        .publish(&subject, Bytes::from("test message"))
        .await
        .expect("Failed to publish");

    let msg = sub.next().await.expect("Failed to receive");
    assert_eq!(msg.payload, Bytes::from("test message"));
}

#[tokio::test]
#[ignore]
async fn test_retained_publish_is_acked() {
    let transport = NatsTransport::connect("nats://localhost:4222")
        .await
        .expect("Failed to connect to NATS");

    let subjects = SubjectBuilder::new(Some("test-env"));

    transport
        .ensure_retained_stream("TEST_ENV_PLATFORMS", vec![subjects.all().to_string()])
        .await
        .expect("Failed to create stream");

    transport
        .publish_retained(&subjects.platform("RHB", "location"), Bytes::from("{}"))
        .await
        .expect("Retained publish was not acknowledged");

    transport.close().await.expect("Failed to flush");
}

#[tokio::test]
#[ignore]
async fn test_late_subscriber_receives_retained_value() {
    let transport = NatsTransport::connect("nats://localhost:4222")
        .await
        .expect("Failed to connect to NATS");

    let subjects = SubjectBuilder::new(Some("test-late"));
    transport
        .ensure_retained_stream("TEST_LATE_PLATFORMS", vec![subjects.all().to_string()])
        .await
        .expect("Failed to create stream");

    let subject = subjects.platform("METEOR", "location");
    transport
        .publish_retained(&subject, Bytes::from(r#"{"lat":13.1}"#))
        .await
        .expect("Retained publish was not acknowledged");

    let mut sub = transport
        .subscribe(subjects.all())
        .await
        .expect("Failed to subscribe");
    let msg = tokio::time::timeout(std::time::Duration::from_secs(5), sub.next())
        .await
        .expect("Retained value was not replayed")
        .expect("Failed to receive");

    assert!(msg.retained);
    assert_eq!(msg.subject, subject.as_ref());
    assert_eq!(msg.payload, Bytes::from(r#"{"lat":13.1}"#));
}
