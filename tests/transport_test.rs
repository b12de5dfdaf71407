// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline scenarios over scripted connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use url::Url;

use cluster_transport::testkit::{MockConnection, MockResponse, StaticSniffer};
use cluster_transport::{
    AttemptKind, Connection, HttpVerb, NodePool, PoolConfig, RequestConfig, ResponseEnvelope,
    Transport, TransportConfig, TransportError,
};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn pool(urls: &[&str]) -> NodePool {
    NodePool::new(urls.iter().map(|u| url(u)).collect()).unwrap()
}

fn transport(conn: &Arc<MockConnection>, pool: NodePool) -> Transport<Arc<MockConnection>> {
    Transport::new(Arc::clone(conn), pool)
}

#[derive(Debug, PartialEq, serde::Deserialize)]
struct Ack {
    ok: bool,
}

#[tokio::test]
async fn test_failover_walks_nodes_until_one_answers() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection reset"));
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body(r#"{"ok":true}"#));

    let transport = transport(
        &conn,
        pool(&["http://n1:9200", "http://n2:9200", "http://n3:9200"]),
    );
    let response = transport
        .request::<Ack>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.status, Some(200));
    assert_eq!(response.body, Some(Ack { ok: true }));
    assert_eq!(response.node, Some(url("http://n3:9200/")));
    assert_eq!(response.dispatch_count(), 3);
    // Only the node that finally answered is alive.
    assert_eq!(transport.pool().alive_count(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_carry_every_attempt_failure() {
    let conn = Arc::new(MockConnection::new());
    for _ in 0..3 {
        conn.enqueue(MockResponse::status(StatusCode::SERVICE_UNAVAILABLE));
    }

    let transport = transport(
        &conn,
        pool(&["http://n1:9200", "http://n2:9200", "http://n3:9200"]),
    );
    let error = transport
        .request::<Value>(
            HttpVerb::Get,
            "_search",
            None,
            RequestConfig::default().with_max_retries(2),
        )
        .await
        .unwrap_err();

    match error {
        TransportError::RetriesExhausted { attempts } => {
            assert_eq!(attempts.len(), 3);
            assert!(attempts
                .iter()
                .all(|a| matches!(a.error, TransportError::Server(_))));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.request_count(), 3);
}

#[tokio::test]
async fn test_max_retries_allows_one_more_attempt_than_retries() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::BAD_GATEWAY));
    conn.enqueue(MockResponse::status(StatusCode::GATEWAY_TIMEOUT));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    // A single node is revived from its dead window for each retry.
    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request::<Value>(
            HttpVerb::Get,
            "_search",
            None,
            RequestConfig::default().with_max_retries(2),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.dispatch_count(), 3);
    assert_eq!(conn.request_count(), 3);
}

#[tokio::test]
async fn test_audit_trail_records_pings_and_dispatches() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let transport = transport(&conn, pool(&["http://n1:9200", "http://n2:9200"]));
    let response = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    // Fresh nodes are pinged before their first dispatch.
    let kinds: Vec<AttemptKind> = response.attempts.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AttemptKind::Ping,
            AttemptKind::Request,
            AttemptKind::Ping,
            AttemptKind::Request,
        ]
    );
    assert!(!response.attempts[1].success);
    assert!(response.attempts[3].success);
    assert_eq!(response.attempts[3].node, url("http://n2:9200/"));
}

#[tokio::test]
async fn test_dead_node_is_skipped_on_the_next_call() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let transport = transport(&conn, pool(&["http://n1:9200", "http://n2:9200"]));
    transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    let second = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    // The second call goes straight to the known-alive node, no ping.
    assert_eq!(second.node, Some(url("http://n2:9200/")));
    assert_eq!(second.dispatch_count(), 1);
    assert_eq!(second.attempts.len(), 1);
    let n1 = transport.pool().find(&url("http://n1:9200")).unwrap();
    assert!(transport.pool().is_dead(&n1));
}

#[tokio::test]
async fn test_ping_failure_marks_dead_and_consumes_retry_budget() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue_ping_failure();
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let transport = transport(&conn, pool(&["http://n1:9200", "http://n2:9200"]));
    let response = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.dispatch_count(), 1);
    assert_eq!(conn.ping_count(), 2);
    assert_eq!(conn.request_count(), 1);
    let n1 = transport.pool().find(&url("http://n1:9200")).unwrap();
    assert!(transport.pool().is_dead(&n1));
}

#[tokio::test]
async fn test_ping_failures_alone_can_exhaust_the_budget() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue_ping_failure();
    conn.enqueue_ping_failure();

    let transport = transport(&conn, pool(&["http://n1:9200", "http://n2:9200"]));
    let error = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap_err();

    match error {
        TransportError::RetriesExhausted { attempts } => assert_eq!(attempts.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.request_count(), 0);
}

#[tokio::test]
async fn test_allowed_status_is_a_success() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::NOT_FOUND).with_body(r#"{"found":false}"#));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request::<Value>(
            HttpVerb::Get,
            "docs/42",
            None,
            RequestConfig::default().with_allowed_status(404),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.success_or_known_error);
    assert!(response.server_error.is_none());
    assert_eq!(response.body, Some(serde_json::json!({"found": false})));
}

#[tokio::test]
async fn test_unexpected_client_error_surfaces_structured_server_error() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(
        MockResponse::status(StatusCode::NOT_FOUND)
            .with_body(r#"{"error":"index missing","status":404}"#),
    );

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request::<Value>(HttpVerb::Get, "docs/42", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(!response.success);
    // A 404 is a real answer from a live node, just not a valid one.
    assert!(response.success_or_known_error);
    assert_eq!(response.dispatch_count(), 1);
    let server_error = response.server_error.unwrap();
    assert_eq!(server_error.status, 404);
    assert!(server_error.reason.contains("index missing"));
    assert!(response.raw.is_some());
    assert!(response.body.is_none());
}

#[tokio::test]
async fn test_throw_on_server_error_fails_the_call() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::BAD_REQUEST).with_body(
        r#"{"error":{"type":"parse_exception","reason":"bad query"},"status":400}"#,
    ));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let error = transport
        .request::<Value>(
            HttpVerb::Post,
            "_search",
            Some(Bytes::from_static(b"{}")),
            RequestConfig::default().throw_on_server_error(),
        )
        .await
        .unwrap_err();

    match error {
        TransportError::Server(server) => {
            assert_eq!(server.status, 400);
            assert!(server.reason.contains("bad query"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_keep_raw_response_retains_the_exact_bytes() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body(r#"{"ok":true}"#));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request::<Value>(
            HttpVerb::Get,
            "_search",
            None,
            RequestConfig::default().keep_raw_response(),
        )
        .await
        .unwrap();

    assert_eq!(response.raw.as_deref(), Some(br#"{"ok":true}"#.as_slice()));
    assert_eq!(response.body, Some(serde_json::json!({"ok": true})));
}

#[tokio::test]
async fn test_stream_responses_hand_back_unread_bytes() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("streamed-bytes"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request_stream(HttpVerb::Get, "export", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.raw.is_none());
    let mut stream = response.body.unwrap();
    let mut buffered = Vec::new();
    stream.read_to_end(&mut buffered).await.unwrap();
    assert_eq!(buffered, b"streamed-bytes");
}

#[tokio::test]
async fn test_void_responses_discard_the_body() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("ignored"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request_void(HttpVerb::Head, "docs/42", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.body, Some(()));
    assert!(response.raw.is_none());
}

#[tokio::test]
async fn test_text_responses_decode_utf8() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("plain text"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request_text(HttpVerb::Get, "status", None, RequestConfig::default())
        .await
        .unwrap();

    assert_eq!(response.body.as_deref(), Some("plain text"));
}

#[tokio::test]
async fn test_reader_override_receives_meta_and_open_stream() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("a,b,c"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request_with(
            HttpVerb::Get,
            "export.csv",
            None,
            RequestConfig::default(),
            |meta, body| async move {
                assert_eq!(meta.status, 200);
                assert_eq!(meta.verb, HttpVerb::Get);
                let mut buffered = Vec::new();
                if let Some(mut stream) = body {
                    stream.read_to_end(&mut buffered).await?;
                }
                Ok(String::from_utf8_lossy(&buffered).split(',').count())
            },
        )
        .await
        .unwrap();

    assert_eq!(response.body, Some(3));
}

#[tokio::test]
async fn test_reader_override_with_raw_retention_reads_a_replay() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("payload"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    let response = transport
        .request_with(
            HttpVerb::Get,
            "export",
            None,
            RequestConfig::default().keep_raw_response(),
            |_meta, body| async move {
                let mut buffered = Vec::new();
                if let Some(mut stream) = body {
                    stream.read_to_end(&mut buffered).await?;
                }
                Ok(buffered.len())
            },
        )
        .await
        .unwrap();

    assert_eq!(response.body, Some(7));
    assert_eq!(response.raw.as_deref(), Some(b"payload".as_slice()));
}

#[tokio::test]
async fn test_empty_body_stream_yields_no_typed_body() {
    // A chunked response can surface an empty body as a present-but-empty
    // stream; the typed outcome must not depend on raw retention.
    for config in [
        RequestConfig::default(),
        RequestConfig::default().keep_raw_response(),
    ] {
        let conn = Arc::new(MockConnection::new());
        conn.enqueue(MockResponse::status(StatusCode::OK).with_body(""));

        let transport = transport(&conn, pool(&["http://n1:9200"]));
        let response = transport
            .request::<Value>(HttpVerb::Get, "docs/42", None, config)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.body.is_none());
    }
}

#[tokio::test]
async fn test_thrown_server_error_leaves_node_unmarked() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(
        MockResponse::status(StatusCode::BAD_REQUEST).with_body(r#"{"error":"bad","status":400}"#),
    );
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    transport
        .request::<Value>(
            HttpVerb::Get,
            "_search",
            None,
            RequestConfig::default().throw_on_server_error(),
        )
        .await
        .unwrap_err();

    // The node was never marked alive, so the next call must ping again.
    transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();
    assert_eq!(conn.ping_count(), 2);
}

#[tokio::test]
async fn test_stale_topology_is_rechecked_on_every_attempt() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    // A sniffer that keeps failing never satisfies the staleness check,
    // so each attempt re-triggers a refresh; sniff-on-failure is off to
    // isolate the scheduled path.
    let sniffer = Arc::new(StaticSniffer::unavailable());
    let pool = NodePool::with_config(
        vec![url("http://n1:9200"), url("http://n2:9200")],
        PoolConfig::new().with_sniff_interval(Duration::ZERO),
    )
    .unwrap();
    let transport = Transport::with_parts(
        Arc::clone(&conn),
        cluster_transport::JsonSerializer,
        pool,
        TransportConfig::default().disable_sniff_on_connection_failure(),
    )
    .with_sniffer(Arc::clone(&sniffer) as Arc<dyn cluster_transport::Sniffer>);

    transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert_eq!(sniffer.sniff_count(), 2);
}

#[tokio::test]
async fn test_malformed_body_fails_without_retry() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("not json"));

    let transport = transport(&conn, pool(&["http://n1:9200", "http://n2:9200"]));
    let error = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Deserialization(_)));
    // The attempt was accepted; a bad body never re-enters the retry loop.
    assert_eq!(conn.request_count(), 1);
}

#[tokio::test]
async fn test_request_body_reaches_the_wire() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let transport = transport(&conn, pool(&["http://n1:9200"]));
    transport
        .request::<Value>(
            HttpVerb::Post,
            "_bulk",
            Some(Bytes::from_static(b"{\"index\":{}}\n")),
            RequestConfig::default(),
        )
        .await
        .unwrap();

    let calls = conn.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].verb, HttpVerb::Post);
    assert_eq!(calls[0].uri, url("http://n1:9200/_bulk"));
    assert_eq!(calls[0].body.as_deref(), Some(b"{\"index\":{}}\n".as_slice()));
}

#[tokio::test]
async fn test_sniff_on_connection_failure_refreshes_topology() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let sniffer = Arc::new(StaticSniffer::new(vec![
        url("http://n1:9200/"),
        url("http://n2:9200/"),
        url("http://n3:9200/"),
    ]));
    let transport = Transport::new(
        Arc::clone(&conn),
        pool(&["http://n1:9200", "http://n2:9200"]),
    )
    .with_sniffer(Arc::clone(&sniffer) as Arc<dyn cluster_transport::Sniffer>);

    let response = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(sniffer.sniff_count(), 1);
    assert_eq!(transport.pool().len(), 3);
}

#[tokio::test]
async fn test_failed_sniff_never_aborts_the_call() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::fault("connection refused"));
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let sniffer = Arc::new(StaticSniffer::unavailable());
    let transport = Transport::new(
        Arc::clone(&conn),
        pool(&["http://n1:9200", "http://n2:9200"]),
    )
    .with_sniffer(Arc::clone(&sniffer) as Arc<dyn cluster_transport::Sniffer>);

    let response = transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(sniffer.sniff_count(), 1);
    assert_eq!(transport.pool().len(), 2);
}

#[tokio::test]
async fn test_scheduled_sniff_runs_when_topology_is_stale() {
    let conn = Arc::new(MockConnection::new());
    conn.enqueue(MockResponse::status(StatusCode::OK).with_body("{}"));

    let sniffer = Arc::new(StaticSniffer::new(vec![
        url("http://n1:9200/"),
        url("http://n2:9200/"),
    ]));
    let pool = NodePool::with_config(
        vec![url("http://n1:9200")],
        PoolConfig::new().with_sniff_interval(Duration::ZERO),
    )
    .unwrap();
    let transport = Transport::new(Arc::clone(&conn), pool)
        .with_sniffer(Arc::clone(&sniffer) as Arc<dyn cluster_transport::Sniffer>);

    transport
        .request::<Value>(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap();

    assert_eq!(sniffer.sniff_count(), 1);
    assert_eq!(transport.pool().len(), 2);
}

/// A connection whose requests hang well past any call deadline.
#[derive(Debug)]
struct SlowConnection;

impl SlowConnection {
    async fn stall(uri: Url) -> ResponseEnvelope {
        tokio::time::sleep(Duration::from_secs(600)).await;
        ResponseEnvelope::received(uri, StatusCode::OK, None)
    }
}

#[async_trait]
impl Connection for SlowConnection {
    async fn head(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn get(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn post(&self, uri: Url, _body: Bytes, _config: &RequestConfig) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn put(&self, uri: Url, _body: Bytes, _config: &RequestConfig) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn delete(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn delete_with_body(
        &self,
        uri: Url,
        _body: Bytes,
        _config: &RequestConfig,
    ) -> ResponseEnvelope {
        Self::stall(uri).await
    }

    async fn ping(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        ResponseEnvelope::received(uri, StatusCode::OK, None)
    }
}

#[tokio::test(start_paused = true)]
async fn test_call_deadline_is_terminal() {
    let transport = Transport::new(SlowConnection, pool(&["http://n1:9200", "http://n2:9200"]));
    let error = transport
        .request::<Value>(
            HttpVerb::Get,
            "_search",
            None,
            RequestConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    // A deadline expiry fails the call without consuming further nodes.
    match error {
        TransportError::Timeout(elapsed) => assert_eq!(elapsed, Duration::from_millis(50)),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_level_default_timeout_applies() {
    let transport = Transport::with_parts(
        SlowConnection,
        cluster_transport::JsonSerializer,
        pool(&["http://n1:9200"]),
        TransportConfig::default().with_request_timeout(Duration::from_millis(80)),
    );
    let error = transport
        .request_void(HttpVerb::Get, "_search", None, RequestConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Timeout(_)));
}
