//! 生成记录存储与"当前选中"投影。
//!
//! 选中状态只保存记录 ID，每次读取时重新按 ID 解析；
//! 记录被删除后悬空的 ID 会在下次读取时清除。

use crate::clock::Clock;
use crate::generation::types::GenerationRecord;
use crate::provider::{TaskStatus, poll_hint_deadline};
use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
pub struct HistoryStore {
    file_path: Option<PathBuf>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    save_lock: Mutex<()>,
}

#[derive(Debug, Default, Clone)]
struct State {
    /// 最新的记录在前。
    records: Vec<GenerationRecord>,
    selected: Option<String>,
}

impl State {
    fn find_mut(&mut self, id: &str) -> Option<&mut GenerationRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }
}

/// 一次终态回写的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 记录已被删除，本次回写不做任何事。
    Missing,
    /// 记录已是终态，保持不变。
    AlreadyTerminal,
    /// 非终态结果，记录保持不变（可能推迟了下次轮询时间）。
    StillProcessing,
    /// 终态已写入；`selected` 表示该记录此刻是否为当前选中。
    Applied { selected: bool },
}

impl HistoryStore {
    /// 仅驻留内存的存储。
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            file_path: None,
            ttl: None,
            clock,
            state: RwLock::new(State::default()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// 加载时丢弃早于 `hours` 小时的记录；0 表示不淘汰。
    pub fn with_ttl_hours(mut self, hours: u64) -> Self {
        self.ttl = i64::try_from(hours)
            .ok()
            .filter(|h| *h > 0)
            .and_then(Duration::try_hours);
        self
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        ensure_parent_dir(path).await?;

        let data = match tokio::fs::read(path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.state.write().await = State::default();
                return Ok(());
            }
            Err(e) => return Err(e).context("读取 history.json 失败"),
        };

        let mut records: Vec<GenerationRecord> = match sonic_rs::from_slice(&data) {
            Ok(v) => v,
            Err(e) => {
                *self.state.write().await = State::default();
                return Err(anyhow!(e)).context("解析 history.json 失败");
            }
        };

        let loaded = records.len();
        let cutoff = self
            .ttl
            .and_then(|ttl| self.clock.now().checked_sub_signed(ttl));
        if let Some(cutoff) = cutoff {
            records.retain(|r| r.created_at >= cutoff);
        }
        if records.len() < loaded {
            tracing::info!("已淘汰 {} 条过期历史记录", loaded - records.len());
        }

        let mut state = self.state.write().await;
        state.selected = records.first().map(|r| r.id.clone());
        state.records = records;
        Ok(())
    }

    /// 新增记录并设为当前选中。
    pub async fn insert(&self, record: GenerationRecord) {
        {
            let mut state = self.state.write().await;
            state.selected = Some(record.id.clone());
            state.records.insert(0, record);
        }
        self.save_or_warn().await;
    }

    pub async fn get(&self, id: &str) -> Option<GenerationRecord> {
        let state = self.state.read().await;
        state.records.iter().find(|r| r.id == id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<GenerationRecord> {
        self.state.read().await.records.clone()
    }

    /// 仍在生成且已有任务 ID 的记录快照。
    pub async fn pending_tasks(&self) -> Vec<GenerationRecord> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .filter(|r| r.is_pending_task())
            .cloned()
            .collect()
    }

    /// 记录异步任务 ID 与首次可轮询时间。
    pub async fn attach_task(
        &self,
        id: &str,
        task_id: String,
        eligible_at: Option<DateTime<Utc>>,
    ) -> Option<GenerationRecord> {
        let updated = {
            let mut state = self.state.write().await;
            let rec = state.find_mut(id).filter(|r| !r.is_terminal())?;
            rec.task_id = Some(task_id);
            if let Some(at) = eligible_at {
                rec.extend_poll_hint(at);
            }
            rec.clone()
        };
        self.save_or_warn().await;
        Some(updated)
    }

    /// 直接写入终态（同步服务商的结果或提交失败）。
    ///
    /// `seed` 为服务商回传的实际种子，仅在成功写入终态时更新。
    pub async fn complete(
        &self,
        id: &str,
        status: &TaskStatus,
        seed: Option<u64>,
    ) -> Option<GenerationRecord> {
        let updated = {
            let mut state = self.state.write().await;
            let rec = state.find_mut(id)?;
            if rec.apply_terminal(status) && seed.is_some() {
                rec.seed = seed;
            }
            rec.clone()
        };
        self.save_or_warn().await;
        Some(updated)
    }

    /// 轮询结果回写。终态在写锁内原子应用；选中投影按 ID 解析，从不被改写。
    pub async fn reconcile(&self, id: &str, status: &TaskStatus) -> ReconcileOutcome {
        let now = self.clock.now();
        let (outcome, changed) = {
            let mut state = self.state.write().await;
            let selected = state.selected.as_deref() == Some(id);
            let Some(rec) = state.find_mut(id) else {
                return ReconcileOutcome::Missing;
            };
            if rec.is_terminal() {
                return ReconcileOutcome::AlreadyTerminal;
            }
            match status {
                TaskStatus::Processing { retry_after_secs } => {
                    let extended = retry_after_secs
                        .and_then(|secs| poll_hint_deadline(now, secs))
                        .is_some_and(|at| rec.extend_poll_hint(at));
                    (ReconcileOutcome::StillProcessing, extended)
                }
                terminal => {
                    rec.apply_terminal(terminal);
                    (ReconcileOutcome::Applied { selected }, true)
                }
            }
        };
        if changed {
            self.save_or_warn().await;
        }
        outcome
    }

    /// 删除记录。若删除的是当前选中，则改选剩余的第一条。
    pub async fn delete(&self, id: &str) -> bool {
        {
            let mut state = self.state.write().await;
            let before = state.records.len();
            state.records.retain(|r| r.id != id);
            if state.records.len() == before {
                return false;
            }
            if state.selected.as_deref() == Some(id) {
                state.selected = state.records.first().map(|r| r.id.clone());
            }
        }
        self.save_or_warn().await;
        true
    }

    /// 移除记录但不改选（用于提交被取消时撤回占位记录）。
    pub async fn discard(&self, id: &str) {
        {
            let mut state = self.state.write().await;
            state.records.retain(|r| r.id != id);
            if state.selected.as_deref() == Some(id) {
                state.selected = None;
            }
        }
        self.save_or_warn().await;
    }

    /// 切换当前选中；`None` 表示取消选中。记录不存在时返回 false。
    pub async fn select(&self, id: Option<&str>) -> bool {
        let mut state = self.state.write().await;
        match id {
            None => {
                state.selected = None;
                true
            }
            Some(id) if state.records.iter().any(|r| r.id == id) => {
                state.selected = Some(id.to_string());
                true
            }
            Some(_) => false,
        }
    }

    /// 当前选中的记录（按 ID 实时解析）；悬空的 ID 会被清除。
    pub async fn selected(&self) -> Option<GenerationRecord> {
        {
            let state = self.state.read().await;
            let id = state.selected.as_deref()?;
            if let Some(rec) = state.records.iter().find(|r| r.id == id) {
                return Some(rec.clone());
            }
        }
        let mut state = self.state.write().await;
        let dangling = state
            .selected
            .as_deref()
            .is_some_and(|id| !state.records.iter().any(|r| r.id == id));
        if dangling {
            state.selected = None;
        }
        None
    }

    pub async fn selected_id(&self) -> Option<String> {
        self.selected().await.map(|r| r.id)
    }

    async fn save_or_warn(&self) {
        if let Err(e) = self.save().await {
            tracing::warn!("保存历史记录失败：{e:#}");
        }
    }

    /// 写入临时文件后 rename，读者永远看不到写了一半的文件。
    pub async fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let snapshot = { self.state.read().await.records.clone() };

        ensure_parent_dir(path).await?;
        let data = sonic_rs::to_vec_pretty(&snapshot).context("序列化 history.json 失败")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .context("写入 history.json 临时文件失败")?;
        tokio::fs::rename(&tmp, path)
            .await
            .context("替换 history.json 失败")
    }
}

async fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .context("创建数据目录失败")
}
