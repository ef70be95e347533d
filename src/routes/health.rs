/**
 * Health Routes
 * Liveness and readiness endpoints
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Single dependency check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub database: ServiceCheck,
}

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /api/health/ready - 503 until the store answers a ping
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();

    let (status, database) = match state.store.ping().await {
        Ok(duration) => (
            StatusCode::OK,
            ServiceCheck {
                status: "healthy".to_string(),
                response_time: Some(duration.as_millis() as u64),
                error: None,
            },
        ),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ServiceCheck {
                    status: "unhealthy".to_string(),
                    response_time: None,
                    error: Some(e.to_string()),
                },
            )
        }
    };

    let response = ReadyResponse {
        status: if status.is_success() {
            "ready".to_string()
        } else {
            "not ready".to_string()
        },
        timestamp: Utc::now(),
        uptime,
        database,
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("memory://".to_string()),
            "JWT_SECRET" => Some("test-secret".to_string()),
            _ => None,
        })
        .unwrap();
        Router::new()
            .route("/api/health", get(health))
            .route("/api/health/ready", get(ready))
            .with_state(AppState::new(Arc::new(MemoryStore::new()), config))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value: T = serde_json::from_slice(&body).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (status, body) = get_json::<HealthResponse>(test_router(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.message, "Server is healthy");
    }

    #[tokio::test]
    async fn test_ready_with_memory_store() {
        let (status, body) = get_json::<ReadyResponse>(test_router(), "/api/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ready");
        assert_eq!(body.database.status, "healthy");
    }

    #[test]
    fn test_service_check_omits_empty_fields() {
        let check = ServiceCheck {
            status: "healthy".to_string(),
            response_time: None,
            error: None,
        };
        let json = serde_json::to_string(&check).unwrap();
        assert_eq!(json, r#"{"status":"healthy"}"#);
    }
}
