//! API Handlers
//!
//! HTTP request handlers exposing the cache service to operators and to the
//! job scheduler that warms and invalidates entries.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::models::{
    ClearRequest, ClearResponse, DeleteResponse, GetResponse, HealthResponse, MGetRequest,
    MGetResponse, SetRequest, SetResponse, StatsResponse,
};
use crate::models::requests::validate_key;
use crate::service::CacheService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared cache service
    pub cache: Arc<CacheService>,
    /// TTL applied when a write does not carry one
    pub default_ttl: u64,
}

impl AppState {
    pub fn new(cache: Arc<CacheService>, default_ttl: u64) -> Self {
        Self { cache, default_ttl }
    }

    /// Builds state from configuration around an already constructed service.
    pub fn from_config(cache: Arc<CacheService>, config: &crate::config::Config) -> Self {
        Self::new(cache, config.server.default_ttl)
    }
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl.unwrap_or(state.default_ttl).max(1);
    state.cache.set(&req.key, &req.value, ttl).await;

    Ok(Json(SetResponse::new(req.key, ttl)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let value = state
        .cache
        .get::<Value>(&key)
        .await
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for POST /mget
pub async fn mget_handler(
    State(state): State<AppState>,
    Json(req): Json<MGetRequest>,
) -> Result<Json<MGetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let values = state.cache.mget::<Value, _>(&req.keys).await;
    Ok(Json(MGetResponse { values }))
}

/// Handler for DELETE /del/:key
///
/// Deleting an absent key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state.cache.del([key.as_str()]).await;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /clear
pub async fn clear_handler(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<ClearResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state.cache.clear_pattern(&req.pattern).await;
    Ok(Json(ClearResponse {
        pattern: req.pattern,
        removed,
    }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.cache.stats().await,
        fallback_entries: state.cache.fallback_len().await,
    })
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_report(state.cache.health().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn test_state() -> AppState {
        AppState::new(Arc::new(CacheService::new(Config::fallback_only())), 300)
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = test_state();

        let req = SetRequest {
            key: "user:1".to_string(),
            value: json!({"name": "ada"}),
            ttl: None,
        };
        let response = set_handler(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(response.ttl, 300);

        let response = get_handler(State(state), Path("user:1".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value, json!({"name": "ada"}));
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state();

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_rejects_oversized_key() {
        let state = test_state();

        let result = get_handler(State(state), Path("k".repeat(257))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_absent_key_succeeds() {
        let state = test_state();

        let result = delete_handler(State(state), Path("never_set".to_string())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mget_handler_keeps_gaps() {
        let state = test_state();
        state.cache.set("a", &1, 60).await;

        let response = mget_handler(
            State(state),
            Json(MGetRequest {
                keys: vec!["a".to_string(), "b".to_string()],
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.values, vec![Some(json!(1)), None]);
    }

    #[tokio::test]
    async fn test_clear_handler_rejects_empty_pattern() {
        let state = test_state();

        let result = clear_handler(
            State(state),
            Json(ClearRequest {
                pattern: String::new(),
            }),
        )
        .await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let state = test_state();

        let req = SetRequest {
            key: "".to_string(),
            value: json!("value"),
            ttl: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(result.is_err());
    }
}
