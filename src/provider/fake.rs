//! 测试用的脚本化适配器。

use crate::credential::Credential;
use crate::error::ProviderError;
use crate::provider::{GenerationRequest, ProviderAdapter, Submission, TaskStatus};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Barrier, Notify};

#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    id: String,
    submissions: Mutex<VecDeque<Result<Submission, ProviderError>>>,
    statuses: Mutex<HashMap<String, TaskStatus>>,
    polls: Mutex<Vec<String>>,
    credentials_seen: Mutex<Vec<Option<String>>>,
    barrier: Option<Arc<Barrier>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    hang_submit: bool,
}

impl ScriptedAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// 每次状态查询都先在 barrier 上汇合，用于验证并发扇出。
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// 状态查询进入后通知 `entered`，并停在 `release` 上直到被放行。
    pub fn with_gate(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    /// 提交永不返回，用于测试取消。
    pub fn hanging(mut self) -> Self {
        self.hang_submit = true;
        self
    }

    pub fn push_submission(&self, r: Result<Submission, ProviderError>) {
        self.submissions.lock().unwrap().push_back(r);
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(task_id.to_string(), status);
    }

    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }

    pub fn credentials_seen(&self) -> Vec<Option<String>> {
        self.credentials_seen.lock().unwrap().clone()
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn submit<'a>(
        &'a self,
        credential: Option<&'a Credential>,
        _request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Submission, ProviderError>> {
        Box::pin(async move {
            self.credentials_seen
                .lock()
                .unwrap()
                .push(credential.map(|c| c.expose().to_string()));
            if self.hang_submit {
                return std::future::pending().await;
            }
            self.submissions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::request("no scripted submission")))
        })
    }

    fn optimize_prompt<'a>(
        &'a self,
        _credential: Option<&'a Credential>,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(async move { Ok(format!("{prompt}, highly detailed")) })
    }

    fn poll_status<'a>(
        &'a self,
        _credential: Option<&'a Credential>,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TaskStatus, ProviderError>> {
        Box::pin(async move {
            self.polls.lock().unwrap().push(task_id.to_string());
            if let Some(b) = &self.barrier {
                b.wait().await;
            }
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            self.statuses
                .lock()
                .unwrap()
                .get(task_id)
                .cloned()
                .ok_or_else(|| ProviderError::request(format!("unknown task {task_id}")))
        })
    }
}
