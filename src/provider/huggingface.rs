//! Hugging Face Spaces（Gradio 队列协议）适配器。
//!
//! 调用分两步：`POST {space}/gradio_api/call/{fn}` 取得 event_id，
//! 再 `GET {space}/gradio_api/call/{fn}/{event_id}` 读取 SSE，取 `complete` 事件的数据。
//! SSE 中出现 `error` 事件通常意味着 ZeroGPU 配额用尽，归一为额度信号。

use crate::credential::Credential;
use crate::error::ProviderError;
use crate::provider::http::HttpClient;
use crate::provider::{
    GenerationRequest, ImageParams, ProviderAdapter, Submission, UpscaleParams, VideoDefaults,
    VideoParams,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};

pub const PROVIDER_ID: &str = "huggingface";

const ZIMAGE_SPACE: &str = "https://luca115-z-image-turbo.hf.space";
const QWEN_IMAGE_SPACE: &str = "https://mcp-tools-qwen-image-fast.hf.space";
const OVIS_IMAGE_SPACE: &str = "https://aidc-ai-ovis-image-7b.hf.space";
const FLUX_SCHNELL_SPACE: &str = "https://black-forest-labs-flux-1-schnell.hf.space";
const UPSCALER_SPACE: &str = "https://tuan2308-upscaler.hf.space";
const WAN2_VIDEO_SPACE: &str = "https://fradeck619-wan2-2-fp8da-aoti-faster.hf.space";
const POLLINATIONS_URL: &str = "https://text.pollinations.ai/openai";

const VIDEO_NEGATIVE_PROMPT: &str = "Vivid colors, overexposed, static, blurry details, subtitles, style, artwork, painting, image, still, overall grayish tone, worst quality, low quality, JPEG compression artifacts, ugly, incomplete, extra fingers, poorly drawn hands, poorly drawn face, deformed, disfigured, malformed limbs, fused fingers, still image, cluttered background, three legs, many people in the background, walking backward, Screen shaking";

#[derive(Debug)]
pub struct HuggingFaceAdapter {
    http: HttpClient,
    video: VideoDefaults,
    prompt_model: String,
    system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    event_id: String,
}

/// 支持的文生图模型。未知模型回落到 Z-Image Turbo。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageModel {
    ZImageTurbo,
    FluxSchnell,
    QwenImage,
    OvisImage,
}

impl ImageModel {
    fn parse(model: Option<&str>) -> Self {
        match model.map(str::trim) {
            Some("flux-1-schnell") => Self::FluxSchnell,
            Some("qwen-image") => Self::QwenImage,
            Some("ovis-image") => Self::OvisImage,
            _ => Self::ZImageTurbo,
        }
    }

    fn default_steps(self) -> u32 {
        match self {
            Self::ZImageTurbo => 9,
            Self::FluxSchnell => 4,
            Self::QwenImage => 8,
            Self::OvisImage => 24,
        }
    }

    /// (space, 函数名, data 数组)
    fn call(self, p: &ImageParams, seed: u64) -> (&'static str, &'static str, Value) {
        let (width, height) = p.aspect_ratio.dimensions(p.enable_hd);
        let steps = p.steps.unwrap_or(self.default_steps());
        match self {
            Self::ZImageTurbo => (
                ZIMAGE_SPACE,
                "generate_image",
                json!([p.prompt, height, width, steps, seed, false]),
            ),
            Self::FluxSchnell => (
                FLUX_SCHNELL_SPACE,
                "infer",
                json!([p.prompt, seed, false, width, height, steps]),
            ),
            Self::QwenImage => (
                QWEN_IMAGE_SPACE,
                "generate_image",
                json!([p.prompt, seed, false, p.aspect_ratio.as_str(), 3, steps]),
            ),
            Self::OvisImage => (
                OVIS_IMAGE_SPACE,
                "generate",
                json!([p.prompt, height, width, seed, steps, 4]),
            ),
        }
    }
}

impl HuggingFaceAdapter {
    pub fn new(
        http: HttpClient,
        video: VideoDefaults,
        prompt_model: String,
        system_prompt: String,
    ) -> Self {
        Self {
            http,
            video,
            prompt_model,
            system_prompt,
        }
    }

    async fn call_gradio(
        &self,
        space: &str,
        func: &str,
        credential: Option<&Credential>,
        data: Value,
    ) -> Result<Value, ProviderError> {
        let queue_url = format!("{space}/gradio_api/call/{func}");
        let resp = self
            .http
            .post_json(&queue_url, credential, &json!({ "data": data }))
            .await?;
        if !resp.is_success() {
            return Err(classify_failure(resp.status, &resp.text()));
        }
        let queued: QueueResponse = sonic_rs::from_slice(&resp.body)?;

        let result_url = format!("{queue_url}/{}", queued.event_id);
        let resp = self
            .http
            .get(&result_url, credential, Some("text/event-stream"))
            .await?;
        if !resp.is_success() {
            return Err(classify_failure(resp.status, &resp.text()));
        }
        extract_complete_event_data(&resp.text())?
            .ok_or_else(|| ProviderError::request("Gradio 响应中没有 complete 事件"))
    }

    async fn generate_image(
        &self,
        credential: Option<&Credential>,
        p: &ImageParams,
    ) -> Result<Submission, ProviderError> {
        let model = ImageModel::parse(p.model.as_deref());
        let seed = p.seed.unwrap_or(42);
        let (space, func, data) = model.call(p, seed);
        let out = self.call_gradio(space, func, credential, data).await?;

        let url = file_url(&out[0])
            .ok_or_else(|| ProviderError::request("Gradio 响应缺少图片地址"))?;
        // Qwen Space 会在第二个输出里回传实际使用的种子。
        let seed = match model {
            ImageModel::QwenImage => out[1].as_str().and_then(parse_seed_text).or(Some(seed)),
            _ => Some(seed),
        };
        Ok(Submission::Completed { url, seed })
    }

    async fn upscale(
        &self,
        credential: Option<&Credential>,
        p: &UpscaleParams,
    ) -> Result<Submission, ProviderError> {
        let data = json!([
            gradio_file(&p.source_url),
            "RealESRGAN_x4plus",
            0.5,
            false,
            4
        ]);
        let out = self
            .call_gradio(UPSCALER_SPACE, "realesrgan", credential, data)
            .await?;
        let url = file_url(&out[0])
            .ok_or_else(|| ProviderError::request("放大结果缺少图片地址"))?;
        Ok(Submission::Completed { url, seed: None })
    }

    /// Wan2 视频：SSE 长连接直到生成结束，对外表现为同步服务商。
    async fn generate_video(
        &self,
        credential: Option<&Credential>,
        p: &VideoParams,
    ) -> Result<Submission, ProviderError> {
        let steps = p.steps.unwrap_or(self.video.steps);
        let duration = p.duration.unwrap_or(self.video.duration);
        let guidance = p.guidance.unwrap_or(self.video.guidance);
        let seed = p.seed.unwrap_or(42);
        let data = json!([
            gradio_file(&p.source_url),
            self.video.prompt_for(p),
            steps,
            VIDEO_NEGATIVE_PROMPT,
            duration,
            guidance,
            guidance,
            seed,
            false
        ]);
        let out = self
            .call_gradio(WAN2_VIDEO_SPACE, "generate_video", credential, data)
            .await?;

        let first = &out[0];
        let url = first["video"]["url"]
            .as_str()
            .map(str::to_string)
            .or_else(|| file_url(first))
            .ok_or_else(|| ProviderError::request("视频结果缺少地址"))?;
        Ok(Submission::Completed {
            url,
            seed: Some(seed),
        })
    }

    /// 提示词优化走 Pollinations，不使用 HF 凭证。
    async fn rewrite_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.prompt_model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt },
            ],
            "stream": false,
        });
        let resp = self.http.post_json(POLLINATIONS_URL, None, &body).await?;
        if !resp.is_success() {
            // 与 HF 凭证无关，429 也不能触发凭证切换。
            return Err(ProviderError::http(resp.status, "提示词优化失败"));
        }
        let v: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| ProviderError::request(format!("提示词优化响应解析失败: {e}")))?;
        Ok(chat_content(&v).unwrap_or_else(|| prompt.to_string()))
    }
}

impl ProviderAdapter for HuggingFaceAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn submit<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Submission, ProviderError>> {
        Box::pin(async move {
            match request {
                GenerationRequest::Image(p) => self.generate_image(credential, p).await,
                GenerationRequest::Upscale(p) => self.upscale(credential, p).await,
                GenerationRequest::Video(p) => self.generate_video(credential, p).await,
            }
        })
    }

    fn optimize_prompt<'a>(
        &'a self,
        _credential: Option<&'a Credential>,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(self.rewrite_prompt(prompt))
    }
}

fn classify_failure(status: u16, body: &str) -> ProviderError {
    if status == 429 {
        return ProviderError::Quota(format!("Hugging Face 429: {}", body.trim()));
    }
    ProviderError::http(status, body.trim().to_string())
}

/// 解析 Gradio SSE 文本，返回 `complete` 事件携带的数据。
///
/// 遇到 `error` 事件视为额度耗尽；没有 complete 事件时返回 `Ok(None)`。
pub fn extract_complete_event_data(sse: &str) -> Result<Option<Value>, ProviderError> {
    let mut in_complete = false;
    for line in sse.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            match event.trim() {
                "complete" => in_complete = true,
                "error" => {
                    return Err(ProviderError::Quota("Gradio 返回 error 事件".to_string()));
                }
                _ => in_complete = false,
            }
        } else if let Some(data) = line.strip_prefix("data:")
            && in_complete
        {
            return match serde_json::from_str(data.trim()) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!("Gradio complete 事件数据解析失败：{e}");
                    Ok(None)
                }
            };
        }
    }
    Ok(None)
}

fn gradio_file(path: &str) -> Value {
    json!({ "path": path, "meta": { "_type": "gradio.FileData" } })
}

fn file_url(v: &Value) -> Option<String> {
    v["url"].as_str().map(str::to_string)
}

fn parse_seed_text(s: &str) -> Option<u64> {
    s.trim()
        .trim_start_matches("Seed used for generation:")
        .trim()
        .parse()
        .ok()
}

pub(crate) fn chat_content(v: &Value) -> Option<String> {
    v["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
