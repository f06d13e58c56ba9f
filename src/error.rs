use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 服务商调用的归一化错误。
///
/// 各服务商的错误形态（HTTP 状态码、SSE error 事件、错误文案关键字）必须在适配器内
/// 归一到这里；重试执行器只根据变体做决策，从不查看错误文本。
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 该服务商今日所有已配置凭证均已耗尽。
    #[error("{provider} 今日所有凭证额度已用尽")]
    QuotaExhausted { provider: String },

    /// 用户主动取消；不算失败，也不会标记任何凭证。
    #[error("请求已取消")]
    Cancelled,

    /// 单个凭证的额度耗尽信号，执行器据此切换到下一个凭证。
    #[error("凭证额度耗尽: {0}")]
    Quota(String),

    #[error("{}", format_request_error(.status, .message))]
    Request {
        status: Option<u16>,
        message: String,
    },

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("未配置的服务商: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Request {
            status: Some(status),
            message: message.into(),
        }
    }
}

fn format_request_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(s) => format!("服务商请求失败 {s}: {message}"),
        None => format!("服务商请求失败: {message}"),
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<sonic_rs::Error> for ProviderError {
    fn from(e: sonic_rs::Error) -> Self {
        Self::request(format!("响应解析失败: {e}"))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("参数错误: {0}")]
    BadRequest(String),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Debug, Serialize)]
struct ErrorBodyInner {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Provider(e) => match e {
                ProviderError::QuotaExhausted { .. } | ProviderError::Quota(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "quota_exhausted")
                }
                // 客户端主动取消：沿用 nginx 的 499 约定。
                ProviderError::Cancelled => (
                    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                    "cancelled",
                ),
                ProviderError::Unsupported(_) => (StatusCode::BAD_REQUEST, "unsupported"),
                ProviderError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider"),
                ProviderError::Request { .. } => (StatusCode::BAD_GATEWAY, "backend"),
            },
            AppError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, ty) = self.status_and_type();
        let body = ErrorBody {
            error: ErrorBodyInner {
                message: self.to_string(),
                r#type: Some(ty.to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_distinct_http_statuses() {
        let cases = [
            (
                AppError::from(ProviderError::QuotaExhausted {
                    provider: "huggingface".to_string(),
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AppError::from(ProviderError::Cancelled), StatusCode::from_u16(499).unwrap()),
            (
                AppError::from(ProviderError::http(500, "boom")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::from(ProviderError::UnknownProvider("x".to_string())),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (err, want) in cases {
            assert_eq!(err.into_response().status(), want);
        }
    }

    #[test]
    fn request_error_message_includes_status_when_known() {
        assert_eq!(
            ProviderError::http(503, "busy").to_string(),
            "服务商请求失败 503: busy"
        );
        assert_eq!(
            ProviderError::request("timeout").to_string(),
            "服务商请求失败: timeout"
        );
    }
}
