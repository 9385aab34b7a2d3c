//! Integration tests covering the literal end-to-end scenarios.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dashmap::DashMap;
use grepwise::alarm::AlarmEngine;
use grepwise::cluster::Coordinator;
use grepwise::config::AppConfig;
use grepwise::index::IndexEngine;
use grepwise::ingestion::{build_router, HttpDriverState};
use grepwise::model::{LogLevel, LogRecord, NotificationChannel, SourceConfig};
use grepwise::notifications::RecordingTransport;
use grepwise::parsers::ParserChain;
use grepwise::query::{self, QueryResult, Statistics};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

async fn test_index() -> (tempfile::TempDir, Arc<IndexEngine>) {
    let dir = tempdir().unwrap();
    let mut config = AppConfig::default();
    config.index_path = dir.path().join("index");
    config.archive_directory = dir.path().join("archive");
    let index = Arc::new(IndexEngine::new(config).unwrap());
    (dir, index)
}

#[tokio::test]
async fn scenario_1_http_ingest_then_search() {
    let (_dir, index) = test_index().await;
    let buffer = Arc::new(grepwise::buffer::LogBuffer::new(100, index.clone()));

    let sources = Arc::new(DashMap::new());
    sources.insert(
        "s1".to_string(),
        SourceConfig::Http {
            id: "s1".into(),
            name: "http source".into(),
            enabled: true,
            path: "/api/logs/s1".into(),
            auth_token: "t1".into(),
            batch_allowed: true,
        },
    );
    let state = HttpDriverState { sources, buffer: buffer.clone() };
    let app = build_router(state);

    let now = chrono::Utc::now().timestamp_millis();
    let body = serde_json::json!({"message": "login failed", "level": "ERROR"}).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/logs/s1")
        .header("content-type", "application/json")
        .header("X-Auth-Token", "t1")
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    buffer.flush().await;

    let results = index
        .search("login", false, Some(now - 60_000), Some(now + 60_000))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, "http:s1");
    assert_eq!(results[0].level, LogLevel::Error);
}

#[test]
fn scenario_2_apache_combined_parse() {
    let chain = ParserChain::new();
    let line = r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /x HTTP/1.0" 200 2326 "http://e/" "M""#;
    let record = chain.parse(line, "access.log").expect("apache combined line should parse");

    assert_eq!(record.level, LogLevel::Info);
    assert_eq!(record.metadata.get("status_code").map(String::as_str), Some("200"));
    assert_eq!(record.metadata.get("method").map(String::as_str), Some("GET"));
    assert_eq!(record.metadata.get("path").map(String::as_str), Some("/x"));
    assert_eq!(record.metadata.get("log_format").map(String::as_str), Some("apache_combined"));
}

#[tokio::test]
async fn scenario_3_retention_with_archive() {
    let dir = tempdir().unwrap();
    let mut config = AppConfig::default();
    config.index_path = dir.path().join("index");
    config.archive_directory = dir.path().join("archive");
    config.partition.partition_type = grepwise::model::PartitionType::Daily;
    config.partition.max_active = 100;
    let index = IndexEngine::new(config).unwrap();

    let now = chrono::Utc::now().timestamp_millis();
    let day_ms = 24 * 60 * 60 * 1000i64;
    // Spread 100 records evenly across the last 10 days so that a cutoff at
    // `now - 5 days` splits the set exactly in half (i=0..=49 kept, i=50..=99 deleted).
    let step = (10 * day_ms) as f64 / 99.0;
    let records: Vec<LogRecord> = (0..100)
        .map(|i| {
            let ts = now - (i as f64 * step) as i64;
            LogRecord::new(ts, LogLevel::Info, format!("event {i}"), "svc", format!("event {i}"))
        })
        .collect();
    index.index(records).await.unwrap();

    let cutoff = now - 5 * day_ms;
    let deleted = index.delete_logs_older_than(cutoff).await.unwrap();
    assert_eq!(deleted, 50);

    let remaining = index.search("*", false, Some(0), Some(now + 1)).await.unwrap();
    assert_eq!(remaining.len(), 50);

    let archives = index.archive_store().list_archives().unwrap();
    let total_logs: u64 = archives.iter().map(|a| a.log_count).sum();
    assert_eq!(total_logs, 50);
}

#[tokio::test]
async fn scenario_4_alarm_fires_once_under_throttling() {
    let (_dir, index) = test_index().await;
    let now = chrono::Utc::now().timestamp_millis();
    index
        .index(vec![
            LogRecord::new(now - 500, LogLevel::Error, "disk full", "svc", "disk full"),
            LogRecord::new(now - 200, LogLevel::Error, "disk full", "svc", "disk full"),
        ])
        .await
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let engine = AlarmEngine::new(index, transport.clone());
    let alarm = grepwise::model::Alarm {
        id: "a1".into(),
        name: "disk-errors".into(),
        description: "".into(),
        query: "*".into(),
        condition: "count > 1".into(),
        threshold: 1,
        time_window_minutes: 1,
        enabled: true,
        notification_channels: vec![NotificationChannel {
            channel_type: "EMAIL".into(),
            destination: "x@y".into(),
        }],
        throttle_window_minutes: 2,
        max_notifications_per_window: 1,
        grouping_key: None,
        grouping_window_minutes: 5,
    };
    engine.create(alarm.clone()).unwrap();

    engine.evaluate(&alarm, now).await.unwrap();
    engine.evaluate(&alarm, now + 1_000).await.unwrap();

    assert_eq!(transport.alerts.lock().unwrap().len(), 1);
    assert_eq!(transport.alerts.lock().unwrap()[0].1, "x@y");
}

#[tokio::test]
async fn scenario_5_query_pipeline_stats_by_level() {
    let (_dir, index) = test_index().await;
    let now = chrono::Utc::now().timestamp_millis();
    let levels = [LogLevel::Error, LogLevel::Info, LogLevel::Error, LogLevel::Warn];
    let records: Vec<LogRecord> = levels
        .iter()
        .enumerate()
        .map(|(i, level)| LogRecord::new(now + i as i64, *level, "m", "svc", "m"))
        .collect();
    index.index(records).await.unwrap();

    let result = query::run_pipeline(&index, "search * | stats count by level", Some(now - 1), Some(now + 1000))
        .await
        .unwrap();

    match result {
        QueryResult::Statistics(Statistics::CountByField(counts)) => {
            let mut expected = HashMap::new();
            expected.insert("ERROR".to_string(), 2u64);
            expected.insert("INFO".to_string(), 1u64);
            expected.insert("WARN".to_string(), 1u64);
            assert_eq!(counts, expected);
        }
        other => panic!("expected CountByField statistics, got {other:?}"),
    }
}

#[test]
fn scenario_6_sharded_ingestion_across_two_nodes() {
    let n1 = Coordinator::new("n1".into(), "http://n1".into(), 15_000, true);
    n1.add_static_peer("n2".into(), "http://n2".into());
    let n2 = Coordinator::new("n2".into(), "http://n2".into(), 15_000, true);
    n2.add_static_peer("n1".into(), "http://n1".into());

    let ids: Vec<String> = (0..10).map(|i| format!("file-source-{i}")).collect();
    let mut owned_by_n1 = Vec::new();
    let mut owned_by_n2 = Vec::new();
    for id in &ids {
        let a = n1.should_process_source(id);
        let b = n2.should_process_source(id);
        assert_ne!(a, b);
        if a {
            owned_by_n1.push(id.clone());
        } else {
            owned_by_n2.push(id.clone());
        }
    }
    assert_eq!(owned_by_n1.len() + owned_by_n2.len(), 10);
}
