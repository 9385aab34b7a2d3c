//! HTTP driver (C8): exposes `POST <path>` and `POST <path>/batch` for each
//! registered HTTP source.

use crate::buffer::LogBuffer;
use crate::model::{LogLevel, LogRecord, SourceConfig};
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub message: String,
    pub level: Option<String>,
    pub timestamp: Option<i64>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct HttpDriverState {
    pub sources: Arc<dashmap::DashMap<String, SourceConfig>>,
    pub buffer: Arc<LogBuffer>,
}

fn record_from_body(body: IngestBody, source_id: &str) -> LogRecord {
    let timestamp = body.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let level = body
        .level
        .as_deref()
        .and_then(|l| LogLevel::from_str(l).ok())
        .unwrap_or(LogLevel::Info);
    let mut record = LogRecord::new(timestamp, level, body.message.clone(), format!("http:{source_id}"), body.message);
    record = record.with_metadata("source_type", "http").with_metadata("source_id", source_id);
    for (k, v) in body.metadata.unwrap_or_default() {
        record = record.with_metadata(k, v);
    }
    record
}

fn authenticate<'a>(
    sources: &'a dashmap::DashMap<String, SourceConfig>,
    source_id: &str,
    headers: &HeaderMap,
) -> Result<dashmap::mapref::one::Ref<'a, String, SourceConfig>, StatusCode> {
    let Some(source) = sources.get(source_id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let SourceConfig::Http { enabled, auth_token, .. } = source.value() else {
        return Err(StatusCode::NOT_FOUND);
    };
    if !*enabled {
        return Err(StatusCode::FORBIDDEN);
    }
    let supplied = headers.get("X-Auth-Token").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !bool::from(supplied.as_bytes().ct_eq(auth_token.as_bytes())) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(source)
}

async fn ingest_single(
    State(state): State<HttpDriverState>,
    AxumPath(source_id): AxumPath<String>,
    headers: HeaderMap,
    Json(body): Json<IngestBody>,
) -> impl IntoResponse {
    if let Err(status) = authenticate(&state.sources, &source_id, &headers) {
        return (
            status,
            Json(IngestResponse {
                success: false,
                count: None,
                error: Some(status.canonical_reason().unwrap_or("error").to_string()),
            }),
        );
    }
    let record = record_from_body(body, &source_id);
    state.buffer.add(record).await;
    (
        StatusCode::OK,
        Json(IngestResponse {
            success: true,
            count: Some(1),
            error: None,
        }),
    )
}

async fn ingest_batch(
    State(state): State<HttpDriverState>,
    AxumPath(source_id): AxumPath<String>,
    headers: HeaderMap,
    Json(bodies): Json<Vec<IngestBody>>,
) -> impl IntoResponse {
    if let Err(status) = authenticate(&state.sources, &source_id, &headers) {
        return (
            status,
            Json(IngestResponse {
                success: false,
                count: None,
                error: Some(status.canonical_reason().unwrap_or("error").to_string()),
            }),
        );
    }
    let count = bodies.len();
    let records = bodies.into_iter().map(|b| record_from_body(b, &source_id)).collect();
    state.buffer.add_all(records).await;
    (
        StatusCode::OK,
        Json(IngestResponse {
            success: true,
            count: Some(count),
            error: None,
        }),
    )
}

/// Builds the shared router mounted under each source's configured `path`.
/// Routes are parameterized on `:source_id` rather than one route per
/// source, since sources are added/removed at runtime.
pub fn build_router(state: HttpDriverState) -> Router {
    Router::new()
        .route("/api/logs/{source_id}", post(ingest_single))
        .route("/api/logs/{source_id}/batch", post(ingest_batch))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn http_source(auth_token: &str) -> SourceConfig {
        SourceConfig::Http {
            id: "s1".into(),
            name: "http source".into(),
            enabled: true,
            path: "/api/logs/s1".into(),
            auth_token: auth_token.into(),
            batch_allowed: true,
        }
    }

    #[test]
    fn authenticate_rejects_mismatched_token() {
        let sources = dashmap::DashMap::new();
        sources.insert("s1".to_string(), http_source("correct-token"));
        let mut headers = HeaderMap::new();
        headers.insert("X-Auth-Token", HeaderValue::from_static("wrong-token"));
        assert_eq!(authenticate(&sources, "s1", &headers).unwrap_err(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn authenticate_accepts_matching_token() {
        let sources = dashmap::DashMap::new();
        sources.insert("s1".to_string(), http_source("correct-token"));
        let mut headers = HeaderMap::new();
        headers.insert("X-Auth-Token", HeaderValue::from_static("correct-token"));
        assert!(authenticate(&sources, "s1", &headers).is_ok());
    }

    #[test]
    fn record_from_body_tags_http_metadata() {
        let body = IngestBody {
            message: "login failed".into(),
            level: Some("ERROR".into()),
            timestamp: None,
            metadata: None,
        };
        let record = record_from_body(body, "s1");
        assert_eq!(record.source, "http:s1");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.metadata.get("source_id").map(String::as_str), Some("s1"));
    }
}
