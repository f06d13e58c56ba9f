use crate::provider::{GenerationRequest, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Upscale,
    Video,
}

impl GenerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Upscale => "upscale",
            Self::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Generating,
    Success,
    Failed,
}

/// 一次生成的完整生命周期状态。
///
/// 状态只允许 `generating -> success | failed`，终态不可再变；
/// `next_poll_eligible_at` 只会向后推移。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub provider_id: String,
    pub kind: GenerationKind,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_poll_eligible_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl GenerationRecord {
    /// 提交前创建的 `generating` 记录。
    pub fn pending(
        id: String,
        provider_id: &str,
        request: &GenerationRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            provider_id: provider_id.to_string(),
            kind: request.kind(),
            status: GenerationStatus::Generating,
            task_id: None,
            result_url: None,
            next_poll_eligible_at: None,
            error_message: None,
            created_at: now,
            prompt: request.prompt().to_string(),
            model: request.model().map(str::to_string),
            seed: request.seed(),
            source_url: request.source_url().map(str::to_string),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != GenerationStatus::Generating
    }

    /// 仍在生成且已拿到任务 ID，需要轮询。
    pub fn is_pending_task(&self) -> bool {
        !self.is_terminal() && self.task_id.is_some()
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_poll_eligible_at.is_none_or(|at| at <= now)
    }

    pub fn succeed(&mut self, url: String) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = GenerationStatus::Success;
        self.result_url = Some(url);
        self.error_message = None;
        true
    }

    pub fn fail(&mut self, message: String) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = GenerationStatus::Failed;
        self.error_message = Some(message);
        true
    }

    /// 应用终态；非终态或记录已是终态时返回 false。
    pub fn apply_terminal(&mut self, status: &TaskStatus) -> bool {
        match status {
            TaskStatus::Succeeded { url } => self.succeed(url.clone()),
            TaskStatus::Failed { message } => self.fail(message.clone()),
            TaskStatus::Processing { .. } => false,
        }
    }

    /// 推迟下次可轮询时间；只接受更晚的时间点。
    pub fn extend_poll_hint(&mut self, at: DateTime<Utc>) -> bool {
        if self.next_poll_eligible_at.is_some_and(|cur| cur >= at) {
            return false;
        }
        self.next_poll_eligible_at = Some(at);
        true
    }
}
