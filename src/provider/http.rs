//! 服务商共用的 HTTP 客户端：统一超时/代理/UA、鉴权头与请求日志。

use crate::config::Config;
use crate::credential::Credential;
use crate::error::ProviderError;
use crate::logging::{self, LogLevel};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    user_agent: String,
    log_level: LogLevel,
}

impl HttpClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            user_agent: cfg.user_agent.clone(),
            log_level: cfg.log_level(),
        })
    }

    fn headers(&self, credential: Option<&Credential>, json: bool) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent).unwrap_or(HeaderValue::from_static("gen2api")),
        );
        if json {
            h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(c) = credential
            && let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", c.expose()))
        {
            h.insert(AUTHORIZATION, v);
        }
        h
    }

    pub async fn post_json(
        &self,
        url: &str,
        credential: Option<&Credential>,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ProviderError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ProviderError::request(format!("请求序列化失败: {e}")))?;
        let headers = self.headers(credential, true);
        logging::backend_request(self.log_level, "POST", url, &headers, &body);

        let start = Instant::now();
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        self.finish("POST", url, start, resp).await
    }

    /// GET 请求；`accept` 用于 SSE 等需要显式声明的场景。
    pub async fn get(
        &self,
        url: &str,
        credential: Option<&Credential>,
        accept: Option<&'static str>,
    ) -> Result<HttpResponse, ProviderError> {
        let mut headers = self.headers(credential, false);
        if let Some(a) = accept {
            headers.insert(ACCEPT, HeaderValue::from_static(a));
        }
        logging::backend_request(self.log_level, "GET", url, &headers, &[]);

        let start = Instant::now();
        let resp = self.http.get(url).headers(headers).send().await?;
        self.finish("GET", url, start, resp).await
    }

    async fn finish(
        &self,
        method: &str,
        url: &str,
        start: Instant,
        resp: reqwest::Response,
    ) -> Result<HttpResponse, ProviderError> {
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        logging::backend_response(self.log_level, method, url, status, start.elapsed(), &bytes);
        Ok(HttpResponse {
            status,
            body: bytes.to_vec(),
        })
    }
}

/// 去掉 URL 末尾多余的斜杠。
pub fn clean_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_base_url_strips_trailing_slashes() {
        assert_eq!(clean_base_url("https://a.example/api//"), "https://a.example/api");
        assert_eq!(clean_base_url(" https://a.example "), "https://a.example");
    }

    #[test]
    fn success_range_is_2xx() {
        let ok = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        let bad = HttpResponse {
            status: 429,
            body: Vec::new(),
        };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
