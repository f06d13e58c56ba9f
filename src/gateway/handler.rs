//! JSON API 处理器。

use axum::{
    Json,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::credential::PoolStats;
use crate::error::{AppError, ProviderError};
use crate::gateway::AppState;
use crate::generation::GenerationRecord;
use crate::provider::GenerationRequest;
use crate::provider::abort::{AbortSignal, abort_pair};

type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub provider: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub provider: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub selected: Option<GenerationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    /// 逗号分隔的凭证列表。
    pub tokens: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsResponse {
    pub provider: String,
    #[serde(flatten)]
    pub stats: PoolStats,
}

pub async fn handle_health() -> &'static str {
    "ok"
}

/// POST /api/generations
///
/// 提交在独立任务中执行；客户端断开导致处理器被丢弃时，通过守卫取消提交。
pub async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<GenerationRecord> {
    req.request.validate().map_err(AppError::bad_request)?;

    let (handle, signal) = abort_pair();
    let guard = handle.abort_on_drop();
    let service = state.service.clone();
    let task =
        tokio::spawn(async move { service.submit(&req.provider, req.request, signal).await });

    let joined = task.await;
    guard.disarm();
    let record = joined.map_err(|e| anyhow::anyhow!("生成任务异常退出：{e}"))??;
    Ok(Json(record))
}

/// POST /api/prompt/optimize
pub async fn handle_optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> ApiResult<OptimizeResponse> {
    if req.prompt.trim().is_empty() {
        return Err(AppError::bad_request("prompt 不能为空"));
    }
    let prompt = state
        .service
        .optimize_prompt(&req.provider, req.prompt.trim(), AbortSignal::never())
        .await?;
    Ok(Json(OptimizeResponse { prompt }))
}

/// GET /api/history
pub async fn handle_history(State(state): State<Arc<AppState>>) -> Json<Vec<GenerationRecord>> {
    Json(state.service.store().snapshot().await)
}

/// DELETE /api/history/{id}
pub async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.service.store().delete(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("记录不存在：{id}")))
    }
}

/// GET /api/selection
pub async fn handle_selection_get(State(state): State<Arc<AppState>>) -> Json<SelectionResponse> {
    Json(SelectionResponse {
        selected: state.service.store().selected().await,
    })
}

/// PUT /api/selection
pub async fn handle_selection_put(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> ApiResult<SelectionResponse> {
    let store = state.service.store();
    let id = req.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if !store.select(id).await {
        return Err(AppError::not_found(format!(
            "记录不存在：{}",
            id.unwrap_or_default()
        )));
    }
    Ok(Json(SelectionResponse {
        selected: store.selected().await,
    }))
}

/// GET /api/credentials/{provider}
pub async fn handle_credentials_get(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> ApiResult<CredentialsResponse> {
    ensure_provider(&state, &provider)?;
    let stats = state.service.executor().pool().stats(&provider);
    Ok(Json(CredentialsResponse { provider, stats }))
}

/// PUT /api/credentials/{provider}
pub async fn handle_credentials_put(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<CredentialsResponse> {
    ensure_provider(&state, &provider)?;
    state.credentials.set_credentials(&provider, &req.tokens);
    let stats = state.service.executor().pool().stats(&provider);
    Ok(Json(CredentialsResponse { provider, stats }))
}

fn ensure_provider(state: &AppState, provider: &str) -> Result<(), AppError> {
    if state.service.registry().contains(provider) {
        Ok(())
    } else {
        Err(ProviderError::UnknownProvider(provider.to_string()).into())
    }
}

/// 配置了 API_KEY 时要求 `Authorization: Bearer <key>` 或 `x-api-key: <key>`。
pub async fn api_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if is_authorized(&headers, &state.cfg.api_key) {
        return next.run(request).await;
    }
    AppError::unauthorized("API Key 无效或缺失").into_response()
}

fn is_authorized(headers: &HeaderMap, api_key: &str) -> bool {
    let expected = api_key.trim();
    if expected.is_empty() {
        return true;
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let x_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    bearer == Some(expected) || x_api_key == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn empty_api_key_disables_auth() {
        assert!(is_authorized(&HeaderMap::new(), ""));
        assert!(is_authorized(&HeaderMap::new(), "  "));
    }

    #[test]
    fn bearer_or_x_api_key_must_match() {
        let mut h = HeaderMap::new();
        assert!(!is_authorized(&h, "secret"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(is_authorized(&h, "secret"));

        let mut h = HeaderMap::new();
        h.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(is_authorized(&h, "secret"));
        assert!(!is_authorized(&h, "other"));
    }

    #[test]
    fn submit_body_flattens_generation_request() {
        let req: SubmitRequest = serde_json::from_str(
            r#"{"provider":"modelscope","kind":"image","prompt":"a fox","aspectRatio":"3:4"}"#,
        )
        .unwrap();
        assert_eq!(req.provider, "modelscope");
        assert_eq!(req.request.prompt(), "a fox");
    }
}
