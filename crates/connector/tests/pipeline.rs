//! End-to-end: tailed NMEA log -> runner -> retained broker state

use std::sync::Arc;
use std::time::Duration;

use relay_connector_lib::http::{build_client, REQUEST_TIMEOUT};
use relay_connector_lib::sources::NmeaSource;
use relay_connector_lib::{CycleOutcome, HttpRangeSource, Publisher, RangeTailer, Runner};
use relay_middleware::{InMemoryTransport, Transport};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

async fn nmea_runner(server: &MockServer, transport: Arc<InMemoryTransport>) -> Runner<NmeaSource> {
    let client = build_client(REQUEST_TIMEOUT).unwrap();
    let url = format!("{}/ships/meteor.log", server.uri());
    let tailer = RangeTailer::new(HttpRangeSource::new(client, url), Duration::ZERO, b"\r\n".to_vec());
    let source = NmeaSource::from_tailers(
        "ships",
        vec![("meteor".to_string(), "METEOR".to_string(), tailer)],
    );
    Runner::new(source, Publisher::new(transport, None), Duration::from_secs(30))
}

#[tokio::test]
async fn test_tailed_fix_is_retained_once() {
    let server = MockServer::start().await;
    let body = format!("{}\r\n", RMC);
    let len = body.len();

    Mock::given(method("GET"))
        .and(path("/ships/meteor.log"))
        .and(header("range", "bytes=0-"))
        .respond_with(ResponseTemplate::new(206).set_body_string(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ships/meteor.log"))
        .and(header("range", format!("bytes={}-", len).as_str()))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let transport = Arc::new(InMemoryTransport::new());
    let mut runner = nmea_runner(&server, transport.clone()).await;

    let first = runner.run_cycle().await.unwrap();
    assert_eq!(
        first,
        CycleOutcome::Published {
            published: 1,
            suppressed: 0,
            failed: 0
        }
    );

    let msg = transport.retained("platform.METEOR.location").unwrap();
    let json: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(json["time"], "1994-03-23T12:35:19Z");
    assert!((json["lat"].as_f64().unwrap() - 48.1173).abs() < 1e-4);
    assert!((json["lon"].as_f64().unwrap() - 11.516_666).abs() < 1e-4);

    // Nothing new in the log: the unchanged fix is suppressed
    let second = runner.run_cycle().await.unwrap();
    assert_eq!(
        second,
        CycleOutcome::Published {
            published: 0,
            suppressed: 1,
            failed: 0
        }
    );
    assert_eq!(transport.retained_count(), 1);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_unreachable_log_fails_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = Arc::new(InMemoryTransport::new());
    let mut runner = nmea_runner(&server, transport.clone()).await;

    let err = runner.run_cycle().await.unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(transport.retained_count(), 0);
}
