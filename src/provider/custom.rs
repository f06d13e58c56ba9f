//! 自定义 REST 服务商适配器。
//!
//! 约定的接口：
//! - `POST /v1/generate`  文生图，同步返回 `{url, seed?}`
//! - `POST /v1/upscaler`  放大，同步返回 `{url}`
//! - `POST /v1/video`     图生视频，返回 `{taskId, predict?}`（异步）或 `{url}` / 纯字符串（同步）
//! - `GET  /v1/task-status?taskId=` 查询异步任务
//! - `POST /v1/text`      提示词优化，返回 `{text}`

use crate::credential::Credential;
use crate::error::ProviderError;
use crate::provider::http::{HttpClient, HttpResponse, clean_base_url};
use crate::provider::{
    GenerationRequest, ProviderAdapter, Submission, TaskStatus, VideoDefaults, clamp_poll_hint,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};

/// `CUSTOM_PROVIDERS` 中的一项。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomProviderConfig {
    pub id: String,
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// `/v1/text` 使用的模型名。
    #[serde(default)]
    pub prompt_model: Option<String>,
}

#[derive(Debug)]
pub struct CustomAdapter {
    id: String,
    base_url: String,
    http: HttpClient,
    video: VideoDefaults,
    prompt_model: String,
}

impl CustomAdapter {
    pub fn new(cfg: &CustomProviderConfig, http: HttpClient, video: VideoDefaults) -> Self {
        Self {
            id: cfg.id.trim().to_string(),
            base_url: clean_base_url(&cfg.api_url),
            http,
            video,
            prompt_model: cfg.prompt_model.clone().unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(
        &self,
        path: &str,
        credential: Option<&Credential>,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let resp = self.http.post_json(&self.url(path), credential, body).await?;
        parse_json(resp)
    }

    async fn submit_request(
        &self,
        credential: Option<&Credential>,
        request: &GenerationRequest,
    ) -> Result<Submission, ProviderError> {
        let model = request.model().unwrap_or_default();
        match request {
            GenerationRequest::Image(p) => {
                let body = json!({
                    "model": model,
                    "prompt": p.prompt,
                    "ar": p.aspect_ratio.as_str(),
                    "seed": p.seed,
                    "steps": p.steps,
                    "guidance": p.guidance,
                    "enableHD": p.enable_hd,
                });
                let v = self.post("/v1/generate", credential, &body).await?;
                let url = url_field(&v).ok_or_else(|| {
                    ProviderError::request("自定义服务商响应缺少 url")
                })?;
                let seed = v["seed"].as_u64().or(p.seed);
                Ok(Submission::Completed { url, seed })
            }
            GenerationRequest::Upscale(p) => {
                let body = json!({ "model": model, "imageUrl": p.source_url });
                let v = self.post("/v1/upscaler", credential, &body).await?;
                let url = url_field(&v).ok_or_else(|| {
                    ProviderError::request("自定义放大服务响应缺少 url")
                })?;
                Ok(Submission::Completed { url, seed: None })
            }
            GenerationRequest::Video(p) => {
                let body = json!({
                    "model": model,
                    "imageUrl": p.source_url,
                    "prompt": self.video.prompt_for(p),
                    "duration": p.duration.unwrap_or(self.video.duration),
                    "seed": p.seed,
                    "steps": p.steps.unwrap_or(self.video.steps),
                    "guidance": p.guidance.unwrap_or(self.video.guidance),
                });
                let v = self.post("/v1/video", credential, &body).await?;
                parse_video_submission(&v, p.seed)
            }
        }
    }

    async fn task_status(
        &self,
        credential: Option<&Credential>,
        task_id: &str,
    ) -> Result<TaskStatus, ProviderError> {
        let url = self.url(&format!(
            "/v1/task-status?taskId={}",
            urlencoding::encode(task_id)
        ));
        let resp = self.http.get(&url, credential, None).await?;
        let v = parse_json(resp)?;
        Ok(parse_task_status(&v))
    }

    async fn rewrite_prompt(
        &self,
        credential: Option<&Credential>,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = json!({ "model": self.prompt_model, "prompt": prompt });
        let v = self.post("/v1/text", credential, &body).await?;
        Ok(v["text"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| prompt.to_string()))
    }
}

impl ProviderAdapter for CustomAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn submit<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Submission, ProviderError>> {
        Box::pin(self.submit_request(credential, request))
    }

    fn optimize_prompt<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(self.rewrite_prompt(credential, prompt))
    }

    fn poll_status<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TaskStatus, ProviderError>> {
        Box::pin(self.task_status(credential, task_id))
    }
}

fn parse_json(resp: HttpResponse) -> Result<Value, ProviderError> {
    if !resp.is_success() {
        let text = resp.text();
        let message = if text.trim().is_empty() {
            format!("Request failed with status {}", resp.status)
        } else {
            text.trim().to_string()
        };
        if resp.status == 429 {
            return Err(ProviderError::Quota(message));
        }
        return Err(ProviderError::http(resp.status, message));
    }
    serde_json::from_slice(&resp.body)
        .map_err(|e| ProviderError::request(format!("自定义服务商响应解析失败: {e}")))
}

/// `url` 可能是字符串，也可能是字符串数组（取第一个）。
fn url_field(v: &Value) -> Option<String> {
    match &v["url"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|i| i.as_str()).map(str::to_string),
        _ => None,
    }
}

fn parse_video_submission(v: &Value, seed: Option<u64>) -> Result<Submission, ProviderError> {
    let task_id = match &v["taskId"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    if let Some(task_id) = task_id {
        let predict_secs = v["predict"]
            .as_u64()
            .or_else(|| v["predict"].as_f64().map(|f| f.max(0.0).ceil() as u64))
            .map(clamp_poll_hint);
        return Ok(Submission::Task {
            task_id,
            predict_secs,
        });
    }
    if let Some(url) = v.as_str().map(str::to_string).or_else(|| url_field(v)) {
        return Ok(Submission::Completed { url, seed });
    }
    Err(ProviderError::request("响应中既没有视频地址也没有任务 ID"))
}

fn parse_task_status(v: &Value) -> TaskStatus {
    match v["status"].as_str().unwrap_or("processing") {
        "success" => match url_field(v) {
            Some(url) => TaskStatus::Succeeded { url },
            // 成功但尚未给出地址：继续等待。
            None => TaskStatus::Processing {
                retry_after_secs: None,
            },
        },
        "failed" => TaskStatus::Failed {
            message: v["error"]
                .as_str()
                .filter(|s| !s.is_empty())
                .unwrap_or("Video generation failed")
                .to_string(),
        },
        _ => TaskStatus::Processing {
            retry_after_secs: v["predict"].as_u64().map(clamp_poll_hint),
        },
    }
}
