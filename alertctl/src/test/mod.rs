//! API integration tests: the full router over mock pipeline dependencies.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::analysis::generation::GenerationError;
use crate::test_utils::{create_test_app, guidance_match, FailingChat, FailingIndex, StaticChat, StaticIndex};

const STRUCTURED_JSON: &str = "{\"incident_type\": \"Brute Force (T1110)\", \"steps\": [\"Block the source IP\", \"Enable MFA\"], \"references\": [\"MITRE ATT&CK T1110\"]}";

#[sqlx::test]
#[test_log::test]
async fn analyze_returns_grounded_response_and_meters_the_request(pool: SqlitePool) {
    let (server, store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex {
            matches: vec![guidance_match("MITRE ATT&CK", 0.91), guidance_match("NIST SP 800-61", 0.74)],
        }),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    let response = server
        .post("/api/v1/analyze")
        .json(&json!({
            "alertText": "Multiple failed SSH logins for root",
            "logPayload": {"events": [{"ip": "203.0.113.7", "user": "root"}]}
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["alert"], "Multiple failed SSH logins for root");
    assert_eq!(body["context"], "IPs involved: 203.0.113.7 | Users involved: root");
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    assert_eq!(body["sources"][0]["title"], "MITRE ATT&CK");
    assert_eq!(body["structured"]["incident_type"], "Brute Force (T1110)");
    assert!(body["response"].as_str().unwrap().contains("1. Block the source IP"));

    // The analytics row lands asynchronously; flush before reading.
    store.flush().await;

    let metrics = server.get("/api/v1/metrics").await;
    metrics.assert_status_ok();
    let rows: Value = metrics.json();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["success"], true);
    assert_eq!(rows[0]["num_sources"], 2);
    assert_eq!(rows[0]["top_k"], 3);

    let summary = server.get("/api/v1/metrics/summary").await;
    summary.assert_status_ok();
    let summary: Value = summary.json();
    assert_eq!(summary["count"], 1);
    assert_eq!(summary["success_rate"], 1.0);
}

#[sqlx::test]
#[test_log::test]
async fn analyze_rejects_blank_alert_text(pool: SqlitePool) {
    let (server, _store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex { matches: vec![] }),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    let response = server.post("/api/v1/analyze").json(&json!({"alertText": "   "})).await;
    response.assert_status_bad_request();

    let body: Value = response.json();
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["message"], "alertText is required");
}

#[sqlx::test]
#[test_log::test]
async fn index_outage_still_yields_an_answer_without_sources(pool: SqlitePool) {
    let (server, store, _bg) = create_test_app(
        pool,
        Arc::new(FailingIndex),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    let response = server
        .post("/api/v1/analyze")
        .json(&json!({"alertText": "Suspicious outbound traffic"}))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["sources"].as_array().unwrap().len(), 0);

    store.flush().await;
    let rows: Value = server.get("/api/v1/metrics").await.json();
    assert_eq!(rows[0]["num_sources"], 0);
    assert_eq!(rows[0]["success"], true);
}

#[sqlx::test]
#[test_log::test]
async fn generation_failure_maps_to_bad_gateway(pool: SqlitePool) {
    let (server, store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex { matches: vec![] }),
        Arc::new(FailingChat {
            error: GenerationError::MalformedOutput,
        }),
    )
    .await;

    let response = server
        .post("/api/v1/analyze")
        .json(&json!({"alertText": "Ransomware note found"}))
        .await;
    assert_eq!(response.status_code().as_u16(), 502);

    let body: Value = response.json();
    assert_eq!(body["kind"], "generation_malformed");

    store.flush().await;
    let rows: Value = server.get("/api/v1/metrics").await.json();
    assert_eq!(rows[0]["success"], false);
    assert!(!rows[0]["error"].as_str().unwrap().is_empty());
}

#[sqlx::test]
#[test_log::test]
async fn metrics_endpoints_report_neutral_values_when_empty(pool: SqlitePool) {
    let (server, _store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex { matches: vec![] }),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    let rows: Value = server.get("/api/v1/metrics").await.json();
    assert_eq!(rows.as_array().unwrap().len(), 0);

    let summary: Value = server.get("/api/v1/metrics/summary").await.json();
    assert_eq!(summary["count"], 0);
    assert_eq!(summary["success_rate"], 0.0);
    assert_eq!(summary["avg_latency_ms"], 0.0);
    assert_eq!(summary["p95_latency_ms"], 0.0);
}

#[sqlx::test]
#[test_log::test]
async fn metrics_limit_is_clamped(pool: SqlitePool) {
    let (server, store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex { matches: vec![] }),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    for i in 0..5 {
        server
            .post("/api/v1/analyze")
            .json(&json!({"alertText": format!("alert {i}")}))
            .await
            .assert_status_ok();
    }
    store.flush().await;

    let rows: Value = server.get("/api/v1/metrics?limit=3").await.json();
    assert_eq!(rows.as_array().unwrap().len(), 3);

    // limit=0 clamps up to 1 rather than erroring
    let rows: Value = server.get("/api/v1/metrics?limit=0").await.json();
    assert_eq!(rows.as_array().unwrap().len(), 1);
}

#[sqlx::test]
#[test_log::test]
async fn healthz_responds_ok(pool: SqlitePool) {
    let (server, _store, _bg) = create_test_app(
        pool,
        Arc::new(StaticIndex { matches: vec![] }),
        Arc::new(StaticChat {
            content: STRUCTURED_JSON.to_string(),
        }),
    )
    .await;

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "OK");
}
