//! ModelScope（魔搭）推理 API 适配器。
//!
//! 必须携带令牌；额度按北京时间自然日重置。

use crate::clock::DayBoundary;
use crate::credential::Credential;
use crate::error::ProviderError;
use crate::provider::http::{HttpClient, HttpResponse};
use crate::provider::huggingface::chat_content;
use crate::provider::{GenerationRequest, ImageParams, ProviderAdapter, Submission};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};

pub const PROVIDER_ID: &str = "modelscope";

const GENERATE_URL: &str = "https://api-inference.modelscope.cn/v1/images/generations";
const CHAT_URL: &str = "https://api-inference.modelscope.cn/v1/chat/completions";

const DEFAULT_STEPS: u32 = 9;

/// 额度类错误文案中的关键字。
const QUOTA_MARKERS: [&str; 5] = ["429", "quota", "credit", "Arrearage", "Bill"];

#[derive(Debug)]
pub struct ModelScopeAdapter {
    http: HttpClient,
    prompt_model: String,
    system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    images: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

/// 对外模型名到 ModelScope 模型 ID 的映射；带 `/` 的名称视为原始模型 ID 直接透传。
pub fn api_model(model: Option<&str>) -> Option<String> {
    let model = model.map(str::trim).filter(|m| !m.is_empty());
    let mapped = match model {
        None | Some("z-image-turbo") => "Tongyi-MAI/Z-Image-Turbo",
        Some("qwen-image") => "Qwen/Qwen-Image",
        Some("flux-1-krea") => "black-forest-labs/FLUX.1-Krea-dev",
        Some(raw) if raw.contains('/') => raw,
        Some(_) => return None,
    };
    Some(mapped.to_string())
}

impl ModelScopeAdapter {
    pub fn new(http: HttpClient, prompt_model: String, system_prompt: String) -> Self {
        Self {
            http,
            prompt_model,
            system_prompt,
        }
    }

    fn require(credential: Option<&Credential>) -> Result<&Credential, ProviderError> {
        credential.ok_or_else(|| ProviderError::request("ModelScope 需要配置访问令牌 (MS_TOKENS)"))
    }

    async fn generate_image(
        &self,
        credential: Option<&Credential>,
        p: &ImageParams,
    ) -> Result<Submission, ProviderError> {
        let credential = Self::require(credential)?;
        let model = api_model(p.model.as_deref()).ok_or_else(|| {
            ProviderError::Unsupported(format!(
                "ModelScope 不支持模型 {}",
                p.model.as_deref().unwrap_or_default()
            ))
        })?;

        let (width, height) = p.aspect_ratio.dimensions(p.enable_hd);
        let seed = p.seed.unwrap_or(42);
        let mut body = json!({
            "prompt": p.prompt,
            "model": model,
            "size": format!("{width}x{height}"),
            "seed": seed,
            "steps": p.steps.unwrap_or(DEFAULT_STEPS),
        });
        if let Some(g) = p.guidance {
            body["guidance"] = json!(g);
        }

        let resp = self.http.post_json(GENERATE_URL, Some(credential), &body).await?;
        if !resp.is_success() {
            return Err(error_from_response(&resp));
        }

        let parsed: GenerationResponse = sonic_rs::from_slice(&resp.body)?;
        let url = parsed
            .images
            .into_iter()
            .find_map(|i| i.url)
            .ok_or_else(|| ProviderError::request("ModelScope 响应缺少图片地址"))?;
        Ok(Submission::Completed {
            url,
            seed: Some(seed),
        })
    }

    async fn rewrite_prompt(
        &self,
        credential: Option<&Credential>,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let credential = Self::require(credential)?;
        let body = json!({
            "model": self.prompt_model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt },
            ],
            "stream": false,
        });
        let resp = self.http.post_json(CHAT_URL, Some(credential), &body).await?;
        if !resp.is_success() {
            return Err(error_from_response(&resp));
        }
        let v: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| ProviderError::request(format!("提示词优化响应解析失败: {e}")))?;
        Ok(chat_content(&v).unwrap_or_else(|| prompt.to_string()))
    }
}

impl ProviderAdapter for ModelScopeAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn day_boundary(&self) -> DayBoundary {
        DayBoundary::beijing()
    }

    fn submit<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Submission, ProviderError>> {
        Box::pin(async move {
            match request {
                GenerationRequest::Image(p) => self.generate_image(credential, p).await,
                other => Err(ProviderError::Unsupported(format!(
                    "ModelScope 不支持 {} 任务",
                    other.kind().as_str()
                ))),
            }
        })
    }

    fn optimize_prompt<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(self.rewrite_prompt(credential, prompt))
    }
}

fn error_from_response(resp: &HttpResponse) -> ProviderError {
    let message = sonic_rs::from_slice::<ErrorResponse>(&resp.body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("ModelScope API 错误: {}", resp.status));
    classify_error(resp.status, message)
}

/// 429 或错误文案含额度关键字时视为凭证额度耗尽。
pub fn classify_error(status: u16, message: String) -> ProviderError {
    if status == 429 || QUOTA_MARKERS.iter().any(|m| message.contains(m)) {
        return ProviderError::Quota(message);
    }
    ProviderError::http(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_markers_are_recognized() {
        for msg in [
            "You exceeded your quota",
            "Arrearage: account overdue",
            "Bill not paid",
            "insufficient credit",
        ] {
            assert!(
                matches!(classify_error(400, msg.to_string()), ProviderError::Quota(_)),
                "{msg}"
            );
        }
        assert!(matches!(
            classify_error(429, "slow".to_string()),
            ProviderError::Quota(_)
        ));
    }

    #[test]
    fn other_failures_stay_request_errors() {
        let err = classify_error(500, "internal".to_string());
        assert!(matches!(
            err,
            ProviderError::Request {
                status: Some(500),
                ..
            }
        ));
    }

    #[test]
    fn error_message_falls_back_to_status() {
        let resp = HttpResponse {
            status: 502,
            body: b"<html>bad gateway</html>".to_vec(),
        };
        assert_eq!(
            error_from_response(&resp).to_string(),
            "服务商请求失败 502: ModelScope API 错误: 502"
        );

        let resp = HttpResponse {
            status: 400,
            body: br#"{"message":"Arrearage"}"#.to_vec(),
        };
        assert!(matches!(error_from_response(&resp), ProviderError::Quota(m) if m == "Arrearage"));
    }

    #[test]
    fn model_mapping() {
        assert_eq!(api_model(None).as_deref(), Some("Tongyi-MAI/Z-Image-Turbo"));
        assert_eq!(api_model(Some("qwen-image")).as_deref(), Some("Qwen/Qwen-Image"));
        assert_eq!(api_model(Some("org/custom")).as_deref(), Some("org/custom"));
        assert_eq!(api_model(Some("unknown")), None);
    }

    #[test]
    fn uses_beijing_day_boundary() {
        let cfg = crate::config::Config::default();
        let http = HttpClient::new(&cfg).unwrap();
        let adapter = ModelScopeAdapter::new(http, String::new(), String::new());
        assert_eq!(adapter.day_boundary(), DayBoundary::beijing());
    }
}
