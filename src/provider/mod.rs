//! 服务商适配层。
//!
//! 每个适配器负责把具体服务商的协议（Gradio 队列、OpenAI 风格 REST、自定义 REST）
//! 收敛为统一的 `Submission` / `TaskStatus`，并把各自的额度错误形态归一为
//! `ProviderError::Quota`。

pub mod abort;
pub mod custom;
#[cfg(test)]
pub mod fake;
pub mod http;
pub mod huggingface;
pub mod modelscope;
pub mod registry;

use crate::clock::DayBoundary;
use crate::credential::Credential;
use crate::error::ProviderError;
use crate::generation::GenerationKind;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use registry::ProviderRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:2")]
    Photo,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "2:3")]
    PhotoPortrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Wide => "16:9",
            Self::Landscape => "4:3",
            Self::Photo => "3:2",
            Self::Tall => "9:16",
            Self::Portrait => "3:4",
            Self::PhotoPortrait => "2:3",
        }
    }

    pub fn base_dimensions(self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Wide => (1024, 576),
            Self::Landscape => (1024, 768),
            Self::Photo => (960, 640),
            Self::Tall => (576, 1024),
            Self::Portrait => (768, 1024),
            Self::PhotoPortrait => (640, 960),
        }
    }

    /// 输出宽高；HD 模式下两边各放大 2 倍。
    pub fn dimensions(self, enable_hd: bool) -> (u32, u32) {
        let (w, h) = self.base_dimensions();
        if enable_hd { (w * 2, h * 2) } else { (w, h) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParams {
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance: Option<f64>,
    #[serde(default, rename = "enableHD")]
    pub enable_hd: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleParams {
    #[serde(default)]
    pub model: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParams {
    #[serde(default)]
    pub model: Option<String>,
    pub source_url: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance: Option<f64>,
}

/// 视频生成的默认参数（请求未指定时使用）。
#[derive(Debug, Clone)]
pub struct VideoDefaults {
    pub prompt: String,
    pub duration: f64,
    pub steps: u32,
    pub guidance: f64,
}

impl VideoDefaults {
    pub fn prompt_for(&self, p: &VideoParams) -> String {
        p.prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.prompt.as_str())
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GenerationRequest {
    Image(ImageParams),
    Upscale(UpscaleParams),
    Video(VideoParams),
}

impl GenerationRequest {
    pub fn kind(&self) -> GenerationKind {
        match self {
            Self::Image(_) => GenerationKind::Image,
            Self::Upscale(_) => GenerationKind::Upscale,
            Self::Video(_) => GenerationKind::Video,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Image(p) => p.model.as_deref(),
            Self::Upscale(p) => p.model.as_deref(),
            Self::Video(p) => p.model.as_deref(),
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Image(p) => &p.prompt,
            Self::Video(p) => p.prompt.as_deref().unwrap_or_default(),
            Self::Upscale(_) => "",
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match self {
            Self::Image(_) => None,
            Self::Upscale(p) => Some(&p.source_url),
            Self::Video(p) => Some(&p.source_url),
        }
    }

    /// 固定种子：未指定时生成一个随机种子，保证记录与请求使用同一个值。
    pub fn with_resolved_seed(mut self) -> Self {
        match &mut self {
            Self::Image(p) if p.seed.is_none() => p.seed = Some(crate::util::id::random_seed()),
            Self::Video(p) if p.seed.is_none() => p.seed = Some(crate::util::id::random_seed()),
            _ => {}
        }
        self
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            Self::Image(p) => p.seed,
            Self::Video(p) => p.seed,
            Self::Upscale(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Image(p) if p.prompt.trim().is_empty() => Err("prompt 不能为空".to_string()),
            Self::Upscale(p) if p.source_url.trim().is_empty() => {
                Err("sourceUrl 不能为空".to_string())
            }
            Self::Video(p) if p.source_url.trim().is_empty() => {
                Err("sourceUrl 不能为空".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// 一次提交的结果：同步服务商直接给出结果，异步服务商给出任务 ID。
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Completed {
        url: String,
        /// 服务商实际使用的种子（部分服务商会回传）。
        seed: Option<u64>,
    },
    Task {
        task_id: String,
        /// 预计多少秒后才可能完成，用于推迟首次轮询。
        predict_secs: Option<u64>,
    },
}

/// 归一化后的任务状态。
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Processing { retry_after_secs: Option<u64> },
    Succeeded { url: String },
    Failed { message: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing { .. })
    }
}

/// 服务商等待提示的上限（秒）。
pub const MAX_POLL_HINT_SECS: u64 = 24 * 3600;

pub fn clamp_poll_hint(secs: u64) -> u64 {
    secs.min(MAX_POLL_HINT_SECS)
}

/// 把等待提示换算为最早可轮询时刻。提示先截断到上限，时间运算溢出时放弃提示。
pub fn poll_hint_deadline(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(clamp_poll_hint(secs)).ok()?;
    now.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    /// 凭证额度按哪个时区的自然日重置。
    fn day_boundary(&self) -> DayBoundary {
        DayBoundary::utc()
    }

    fn submit<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Submission, ProviderError>>;

    fn optimize_prompt<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>>;

    /// 查询异步任务状态；只有异步服务商需要实现。
    fn poll_status<'a>(
        &'a self,
        _credential: Option<&'a Credential>,
        _task_id: &'a str,
    ) -> BoxFuture<'a, Result<TaskStatus, ProviderError>> {
        let id = self.id().to_string();
        Box::pin(async move { Err(ProviderError::Unsupported(format!("{id} 不支持任务查询"))) })
    }
}
