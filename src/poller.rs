//! 异步任务轮询器。
//!
//! 单个长生命周期的调度循环：每轮重新读取待轮询记录，按 `next_poll_eligible_at`
//! 划分就绪与未就绪，就绪记录并发查询状态，整批结束后再进入下一轮。
//! 终态结果在存储的写锁内原子回写；当前选中只按 ID 解析，轮询器从不改写它。

use crate::clock::Clock;
use crate::credential::RequestExecutor;
use crate::error::ProviderError;
use crate::generation::{GenerationRecord, HistoryStore, ReconcileOutcome};
use crate::provider::{ProviderRegistry, TaskStatus};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 一轮调度的统计，以及下一轮前应等待的时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub pending: usize,
    pub polled: usize,
    pub reconciled: usize,
    pub next_delay: Duration,
}

#[derive(Debug)]
pub struct TaskPoller {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Inner {
    store: Arc<HistoryStore>,
    registry: Arc<ProviderRegistry>,
    executor: RequestExecutor,
    clock: Arc<dyn Clock>,
    base_interval: Duration,
    alive: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl TaskPoller {
    pub fn new(
        store: Arc<HistoryStore>,
        registry: Arc<ProviderRegistry>,
        executor: RequestExecutor,
        clock: Arc<dyn Clock>,
        base_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                executor,
                clock,
                base_interval,
                alive: AtomicBool::new(false),
                shutdown,
            }),
            handle: Mutex::new(None),
        }
    }

    /// 启动调度循环；已在运行时返回 false，不会启动第二个循环。
    pub fn start(&self) -> bool {
        if self
            .inner
            .alive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        self.inner.shutdown.send_replace(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_loop().await });
        *self.lock_handle() = Some(handle);

        tracing::info!(
            interval_secs = self.inner.base_interval.as_secs(),
            "任务轮询器已启动"
        );
        true
    }

    /// 停止循环：清除存活标记、唤醒等待中的定时并等待循环退出。
    pub async fn stop(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);

        let handle = self.lock_handle().take();
        if let Some(h) = handle
            && let Err(e) = h.await
        {
            tracing::warn!("任务轮询器退出异常：{e}");
        }
        tracing::info!("任务轮询器已停止");
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// 执行一轮调度（测试可直接驱动单轮，而不依赖真实定时器）。
    pub async fn run_cycle(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let report = self.run_cycle().await;
            if report.polled > 0 {
                tracing::debug!(
                    pending = report.pending,
                    polled = report.polled,
                    reconciled = report.reconciled,
                    "轮询完成"
                );
            }

            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(report.next_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let pending = self.store.pending_tasks().await;
        let mut report = CycleReport {
            pending: pending.len(),
            polled: 0,
            reconciled: 0,
            next_delay: self.base_interval,
        };
        if pending.is_empty() {
            return report;
        }

        let now = self.clock.now();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|r| r.is_ready(now));

        if ready.is_empty() {
            let earliest = waiting.iter().filter_map(|r| r.next_poll_eligible_at).min();
            if let Some(at) = earliest {
                let until = (at - now).to_std().unwrap_or(Duration::ZERO);
                report.next_delay = report.next_delay.max(until);
            }
            return report;
        }

        report.polled = ready.len();
        let results = join_all(ready.iter().map(|r| self.check(r))).await;

        for (record, result) in ready.iter().zip(results) {
            let status = match result {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(
                        id = %record.id,
                        provider = %record.provider_id,
                        "任务状态查询失败，本轮跳过：{e}"
                    );
                    continue;
                }
            };

            match self.store.reconcile(&record.id, &status).await {
                ReconcileOutcome::Applied { selected } => {
                    report.reconciled += 1;
                    tracing::info!(
                        id = %record.id,
                        selected,
                        success = matches!(status, TaskStatus::Succeeded { .. }),
                        "异步任务已结束"
                    );
                }
                ReconcileOutcome::Missing => {
                    tracing::warn!(id = %record.id, "记录已删除，忽略任务结果");
                }
                ReconcileOutcome::AlreadyTerminal => {
                    tracing::warn!(id = %record.id, "记录已是终态，忽略任务结果");
                }
                ReconcileOutcome::StillProcessing => {}
            }
        }

        report
    }

    async fn check(&self, record: &GenerationRecord) -> Result<TaskStatus, ProviderError> {
        let adapter = self.registry.get(&record.provider_id)?;
        let Some(task_id) = record.task_id.as_deref() else {
            return Err(ProviderError::request("记录缺少任务 ID"));
        };
        self.executor
            .execute_once(&record.provider_id, move |credential| async move {
                adapter.poll_status(credential.as_ref(), task_id).await
            })
            .await
    }
}
