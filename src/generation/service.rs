//! 生成请求的入口：创建记录、经执行器提交、按结果回写记录。

use crate::clock::Clock;
use crate::credential::RequestExecutor;
use crate::error::ProviderError;
use crate::generation::store::HistoryStore;
use crate::generation::types::GenerationRecord;
use crate::provider::abort::AbortSignal;
use crate::provider::{
    GenerationRequest, ProviderRegistry, Submission, TaskStatus, poll_hint_deadline,
};
use crate::util::id;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GenerationService {
    registry: Arc<ProviderRegistry>,
    executor: RequestExecutor,
    store: Arc<HistoryStore>,
    clock: Arc<dyn Clock>,
}

impl GenerationService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        executor: RequestExecutor,
        store: Arc<HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// 提交一次生成。
    ///
    /// - 同步结果直接写为 `success`；
    /// - 异步任务记下 task_id，若带预计耗时则推迟首次轮询；
    /// - 失败写为 `failed` 并返回错误；
    /// - 取消时撤回占位记录，返回 `Cancelled`。
    pub async fn submit(
        &self,
        provider_id: &str,
        request: GenerationRequest,
        abort: AbortSignal,
    ) -> Result<GenerationRecord, ProviderError> {
        let adapter = self.registry.get(provider_id)?;
        let request = request.with_resolved_seed();

        let mut record =
            GenerationRecord::pending(id::record_id(), provider_id, &request, self.clock.now());
        self.store.insert(record.clone()).await;

        tracing::info!(
            provider = provider_id,
            kind = record.kind.as_str(),
            id = %record.id,
            "提交生成请求"
        );

        let result = abort
            .run(self.executor.execute(provider_id, |credential| {
                let adapter = adapter.clone();
                let request = request.clone();
                async move { adapter.submit(credential.as_ref(), &request).await }
            }))
            .await;

        match result {
            Ok(Submission::Completed { url, seed }) => {
                let status = TaskStatus::Succeeded { url };
                record.apply_terminal(&status);
                if seed.is_some() {
                    record.seed = seed;
                }
                Ok(self
                    .store
                    .complete(&record.id, &status, seed)
                    .await
                    .unwrap_or(record))
            }
            Ok(Submission::Task {
                task_id,
                predict_secs,
            }) => {
                let eligible_at =
                    predict_secs.and_then(|s| poll_hint_deadline(self.clock.now(), s));
                tracing::info!(
                    provider = provider_id,
                    id = %record.id,
                    task_id = %task_id,
                    predict_secs,
                    "已创建异步任务"
                );
                record.task_id = Some(task_id.clone());
                if let Some(at) = eligible_at {
                    record.extend_poll_hint(at);
                }
                Ok(self
                    .store
                    .attach_task(&record.id, task_id, eligible_at)
                    .await
                    .unwrap_or(record))
            }
            Err(ProviderError::Cancelled) => {
                tracing::info!(provider = provider_id, id = %record.id, "生成请求已取消");
                self.store.discard(&record.id).await;
                Err(ProviderError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(provider = provider_id, id = %record.id, "生成失败：{e}");
                let status = TaskStatus::Failed {
                    message: e.to_string(),
                };
                self.store.complete(&record.id, &status, None).await;
                Err(e)
            }
        }
    }

    /// 提示词优化；只返回文本，不产生记录。
    pub async fn optimize_prompt(
        &self,
        provider_id: &str,
        prompt: &str,
        abort: AbortSignal,
    ) -> Result<String, ProviderError> {
        let adapter = self.registry.get(provider_id)?;
        abort
            .run(self.executor.execute(provider_id, |credential| {
                let adapter = adapter.clone();
                let prompt = prompt.to_string();
                async move { adapter.optimize_prompt(credential.as_ref(), &prompt).await }
            }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::CredentialPool;
    use crate::credential::pool::StaticCredentials;
    use crate::generation::types::GenerationStatus;
    use crate::provider::abort::abort_pair;
    use crate::provider::fake::ScriptedAdapter;
    use crate::provider::{ImageParams, MAX_POLL_HINT_SECS, VideoParams};
    use chrono::Duration;

    struct Fixture {
        service: GenerationService,
        adapter: Arc<ScriptedAdapter>,
        clock: Arc<ManualClock>,
    }

    fn fixture(adapter: ScriptedAdapter, credentials: &[&str]) -> Fixture {
        let clock = Arc::new(ManualClock::at("2025-06-01T12:00:00Z"));
        let adapter = Arc::new(adapter);
        let mut registry = ProviderRegistry::new();
        registry.register(adapter.clone());

        let source = StaticCredentials::with("fake", credentials);
        let pool = CredentialPool::new(Arc::new(source), clock.clone());
        let service = GenerationService::new(
            Arc::new(registry),
            RequestExecutor::new(Arc::new(pool)),
            Arc::new(HistoryStore::new(clock.clone())),
            clock.clone(),
        );
        Fixture {
            service,
            adapter,
            clock,
        }
    }

    fn image(prompt: &str) -> GenerationRequest {
        GenerationRequest::Image(ImageParams {
            prompt: prompt.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn sync_result_is_written_as_success() {
        let f = fixture(ScriptedAdapter::new("fake"), &["A"]);
        f.adapter.push_submission(Ok(Submission::Completed {
            url: "https://x/a.png".to_string(),
            seed: Some(77),
        }));

        let rec = f
            .service
            .submit("fake", image("cat"), AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(rec.status, GenerationStatus::Success);
        assert_eq!(rec.result_url.as_deref(), Some("https://x/a.png"));
        assert_eq!(rec.seed, Some(77));
        assert_eq!(f.service.store().selected_id().await, Some(rec.id));
        assert_eq!(f.adapter.credentials_seen(), vec![Some("A".to_string())]);
    }

    #[tokio::test]
    async fn async_task_defers_first_poll_by_predict_hint() {
        let f = fixture(ScriptedAdapter::new("fake"), &[]);
        f.adapter.push_submission(Ok(Submission::Task {
            task_id: "t-1".to_string(),
            predict_secs: Some(10),
        }));

        let req = GenerationRequest::Video(VideoParams {
            source_url: "https://x/a.png".to_string(),
            ..Default::default()
        });
        let rec = f
            .service
            .submit("fake", req, AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(rec.status, GenerationStatus::Generating);
        assert_eq!(rec.task_id.as_deref(), Some("t-1"));
        assert_eq!(
            rec.next_poll_eligible_at,
            Some(f.clock.now() + Duration::seconds(10))
        );
        assert_eq!(f.service.store().pending_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn oversized_predict_hint_still_attaches_task() {
        let f = fixture(ScriptedAdapter::new("fake"), &[]);
        f.adapter.push_submission(Ok(Submission::Task {
            task_id: "t-1".to_string(),
            predict_secs: Some(u64::MAX),
        }));

        let req = GenerationRequest::Video(VideoParams {
            source_url: "https://x/a.png".to_string(),
            ..Default::default()
        });
        let rec = f
            .service
            .submit("fake", req, AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(rec.task_id.as_deref(), Some("t-1"));
        assert_eq!(
            rec.next_poll_eligible_at,
            Some(f.clock.now() + Duration::seconds(MAX_POLL_HINT_SECS as i64))
        );
        let pending = f.service.store().pending_tasks().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn failure_is_recorded_and_returned() {
        let f = fixture(ScriptedAdapter::new("fake"), &["A"]);
        f.adapter
            .push_submission(Err(ProviderError::http(500, "boom")));

        let err = f
            .service
            .submit("fake", image("cat"), AbortSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Request { .. }));

        let records = f.service.store().snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, GenerationStatus::Failed);
        assert!(records[0].error_message.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn all_credentials_exhausted_fails_the_record() {
        let f = fixture(ScriptedAdapter::new("fake"), &["A"]);
        f.adapter
            .push_submission(Err(ProviderError::Quota("429".to_string())));

        let err = f
            .service
            .submit("fake", image("cat"), AbortSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));
        assert_eq!(f.service.executor().pool().stats("fake").exhausted, 1);
    }

    #[tokio::test]
    async fn cancel_discards_placeholder_record() {
        let f = fixture(ScriptedAdapter::new("fake").hanging(), &["A"]);
        let (handle, signal) = abort_pair();

        let service = f.service.clone();
        let task =
            tokio::spawn(async move { service.submit("fake", image("cat"), signal).await });
        // 等待占位记录写入后再取消。
        while f.service.store().snapshot().await.is_empty() {
            tokio::task::yield_now().await;
        }
        handle.abort();

        let res = task.await.unwrap();
        assert!(matches!(res, Err(ProviderError::Cancelled)));
        assert!(f.service.store().snapshot().await.is_empty());
        assert_eq!(f.service.executor().pool().stats("fake").exhausted, 0);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected_without_record() {
        let f = fixture(ScriptedAdapter::new("fake"), &[]);
        let err = f
            .service
            .submit("nope", image("cat"), AbortSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
        assert!(f.service.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn optimize_prompt_returns_text_only() {
        let f = fixture(ScriptedAdapter::new("fake"), &[]);
        let out = f
            .service
            .optimize_prompt("fake", "a cat", AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(out, "a cat, highly detailed");
        assert!(f.service.store().snapshot().await.is_empty());
    }
}
