use reqwest::header::HeaderMap;
use sonic_rs::prelude::*;
use std::time::Duration;

/// 后端日志等级（由 DEBUG 环境变量控制）：
/// - off：不输出服务商请求/响应
/// - low：仅输出一行摘要（方法、URL、状态码、耗时）
/// - medium：输出请求/响应体（格式化、凭证打码、长字段截断）
/// - high：完全原始输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "summary" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn summary_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn body_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

/// 凭证打码：保留前 8 个字符，其余以 `...` 代替。
pub fn mask_secret(secret: &str) -> String {
    const VISIBLE: usize = 8;
    if secret.chars().count() <= VISIBLE {
        return "***".to_string();
    }
    let head: String = secret.chars().take(VISIBLE).collect();
    format!("{head}...")
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn backend_request(level: LogLevel, method: &str, url: &str, headers: &HeaderMap, body: &[u8]) {
    if !level.body_enabled() {
        return;
    }
    if level.raw_enabled() {
        tracing::info!(
            "\n=================== 服务商请求（RAW） ===================\n[服务商请求] {method} {url}\n[请求头]\n{}\n[请求体]\n{}\n=========================================================",
            format_headers(headers, false),
            String::from_utf8_lossy(body),
        );
        return;
    }
    tracing::info!(
        "\n====================== 服务商请求 ========================\n[服务商请求] {method} {url}\n[请求头]\n{}\n{}\n==========================================================",
        format_headers(headers, true),
        format_body_bytes(body)
    );
}

pub fn backend_response(
    level: LogLevel,
    method: &str,
    url: &str,
    status: u16,
    duration: Duration,
    body: &[u8],
) {
    if !level.summary_enabled() {
        return;
    }
    let ms = format_duration_ms(duration);
    if !level.body_enabled() {
        tracing::info!("[服务商] {method} {url} -> {status} {ms}ms");
        return;
    }
    if level.raw_enabled() {
        tracing::info!(
            "\n=================== 服务商响应（RAW） ===================\n[服务商响应] {status} {ms}ms\n{}\n=========================================================",
            String::from_utf8_lossy(body),
        );
        return;
    }
    tracing::info!(
        "\n====================== 服务商响应 ========================\n[服务商响应] {status} {ms}ms\n{}\n==========================================================",
        format_body_bytes(body)
    );
}

fn format_headers(headers: &HeaderMap, redact: bool) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let val = match value.to_str() {
            Ok(v) if redact && is_secret_header(key) => redact_auth_value(v),
            Ok(v) => v.to_string(),
            Err(_) => "<binary>".to_string(),
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&val);
        out.push('\n');
    }
    out
}

fn is_secret_header(key: &str) -> bool {
    let key = key.to_lowercase();
    key == "authorization" || key == "proxy-authorization" || key == "x-api-key"
}

fn redact_auth_value(v: &str) -> String {
    match v.strip_prefix("Bearer ") {
        Some(token) => format!("Bearer {}", mask_secret(token.trim())),
        None => mask_secret(v),
    }
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => {
            let sanitized = sanitize_json_for_log(&v);
            sonic_rs::to_string_pretty(&sanitized).unwrap_or_else(|_| sanitized.to_string())
        }
        // Gradio 的 SSE 响应不是 JSON，按文本截断输出。
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 16 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

/// 递归截断 data URL / 超长字符串，避免图片内容刷屏。
fn sanitize_json_for_log(v: &sonic_rs::Value) -> sonic_rs::Value {
    if let Some(obj) = v.as_object() {
        let mut out = sonic_rs::Object::new();
        for (k, child) in obj.iter() {
            out.insert(k, sanitize_json_for_log(child));
        }
        return out.into_value();
    }
    if let Some(arr) = v.as_array() {
        let items: Vec<sonic_rs::Value> = arr.iter().map(sanitize_json_for_log).collect();
        return sonic_rs::Value::from(items);
    }
    if let Some(s) = v.as_str() {
        return sonic_rs::Value::from(truncate_long_string(s).as_str());
    }
    v.clone()
}

fn truncate_long_string(s: &str) -> String {
    const MAX: usize = 256;
    if s.starts_with("data:") || s.len() > 4 * MAX {
        let head: String = s.chars().take(MAX).collect();
        return format!("{head}...[{} bytes]", s.len());
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HeaderValue};

    #[test]
    fn log_level_parse_accepts_aliases() {
        assert_eq!(LogLevel::parse("off"), LogLevel::Off);
        assert_eq!(LogLevel::parse(" LOW "), LogLevel::Low);
        assert_eq!(LogLevel::parse("backend"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("raw"), LogLevel::High);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Off);
        assert!(LogLevel::High.body_enabled());
        assert!(!LogLevel::Low.body_enabled());
    }

    #[test]
    fn mask_secret_keeps_prefix_only() {
        assert_eq!(mask_secret("hf_abcdefghijkl"), "hf_abcde...");
        assert_eq!(mask_secret("short"), "***");
    }

    #[test]
    fn authorization_header_is_redacted() {
        let mut h = HeaderMap::new();
        h.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Bearer ms-1234567890abcdef"),
        );
        let out = format_headers(&h, true);
        assert!(out.contains("Bearer ms-12345..."));
        assert!(!out.contains("67890abcdef"));
    }

    #[test]
    fn data_urls_are_truncated_in_bodies() {
        let long = format!("data:image/png;base64,{}", "A".repeat(2000));
        let body = format!(r#"{{"image":"{long}","prompt":"cat"}}"#);
        let out = format_body_bytes(body.as_bytes());
        assert!(out.contains("cat"));
        assert!(out.contains("bytes]"));
        assert!(out.len() < long.len());
    }
}
