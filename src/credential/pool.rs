//! 凭证池：按服务商维护有序凭证列表与"当日耗尽"记录。
//!
//! 所有读写都是同步、本地的（不跨 await），并发调用方在标记发生的瞬间即可看到缩小后的池。

use crate::clock::{Clock, DayBoundary};
use crate::credential::types::{Credential, ExhaustionRecord, PoolStats};
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 凭证配置来源（外部配置协作者）。凭证池只读，从不修改。
pub trait CredentialSource: Send + Sync + std::fmt::Debug {
    /// 返回该服务商按配置顺序排列的凭证；未配置时返回空列表。
    fn credentials(&self, provider_id: &str) -> Vec<Credential>;
}

#[derive(Debug)]
pub struct CredentialPool {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    boundaries: HashMap<String, DayBoundary>,
    status: Mutex<HashMap<String, ExhaustionRecord>>,
    status_path: Option<PathBuf>,
}

impl CredentialPool {
    pub fn new(source: Arc<dyn CredentialSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            boundaries: HashMap::new(),
            status: Mutex::new(HashMap::new()),
            status_path: None,
        }
    }

    /// 设置某服务商的自然日边界（默认 UTC）。
    pub fn with_day_boundary(mut self, provider_id: &str, boundary: DayBoundary) -> Self {
        self.boundaries.insert(provider_id.to_string(), boundary);
        self
    }

    /// 启用耗尽状态持久化，并尝试加载已有文件。
    ///
    /// 文件缺失视为空状态；文件损坏时记录告警并从空状态开始。
    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match load_status(&path) {
            Ok(loaded) => {
                *self.status.get_mut().unwrap_or_else(|e| e.into_inner()) = loaded;
            }
            Err(e) => {
                tracing::warn!("加载凭证耗尽状态失败，将从空状态开始：{e:#}");
            }
        }
        self.status_path = Some(path);
        self
    }

    pub fn credential_count(&self, provider_id: &str) -> usize {
        self.source.credentials(provider_id).len()
    }

    /// 凭证总数 / 今日可用 / 今日已耗尽。
    pub fn stats(&self, provider_id: &str) -> PoolStats {
        let credentials = self.source.credentials(provider_id);
        let today = self.today(provider_id);
        let status = self.lock_status();
        let exhausted = match status.get(provider_id) {
            Some(rec) => credentials
                .iter()
                .filter(|c| rec.is_exhausted(today, c))
                .count(),
            None => 0,
        };
        PoolStats {
            total: credentials.len(),
            active: credentials.len() - exhausted,
            exhausted,
        }
    }

    /// 按配置顺序返回第一个今日未耗尽的凭证（稳定顺序，不轮转）。
    pub fn next_available(&self, provider_id: &str) -> Option<Credential> {
        let credentials = self.source.credentials(provider_id);
        let today = self.today(provider_id);
        let status = self.lock_status();
        let rec = status.get(provider_id);
        credentials
            .into_iter()
            .find(|c| rec.is_none_or(|r| !r.is_exhausted(today, c)))
    }

    /// 状态查询用的凭证：优先可用凭证，全部耗尽时退回第一个已配置凭证。
    pub fn first_for_status_check(&self, provider_id: &str) -> Option<Credential> {
        self.next_available(provider_id)
            .or_else(|| self.source.credentials(provider_id).into_iter().next())
    }

    /// 标记凭证今日已耗尽（幂等），并立即持久化。
    pub fn mark_exhausted(&self, provider_id: &str, credential: &Credential) {
        let today = self.today(provider_id);
        let snapshot = {
            let mut status = self.lock_status();
            let changed = status
                .entry(provider_id.to_string())
                .or_default()
                .mark(today, credential);
            if !changed {
                return;
            }
            status.clone()
        };

        tracing::warn!(
            provider = provider_id,
            credential = %credential,
            "凭证今日额度已耗尽，切换到下一个凭证"
        );

        if let Some(path) = &self.status_path
            && let Err(e) = save_status(path, &snapshot)
        {
            tracing::warn!("保存凭证耗尽状态失败：{e:#}");
        }
    }

    fn today(&self, provider_id: &str) -> NaiveDate {
        self.boundaries
            .get(provider_id)
            .copied()
            .unwrap_or_default()
            .today(self.clock.now())
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, HashMap<String, ExhaustionRecord>> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_status(path: &Path) -> anyhow::Result<HashMap<String, ExhaustionRecord>> {
    let data = match std::fs::read(path) {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e).context("读取凭证状态文件失败"),
    };
    sonic_rs::from_slice(&data).context("解析凭证状态文件失败")
}

fn save_status(path: &Path, status: &HashMap<String, ExhaustionRecord>) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context("创建数据目录失败")?;
    }
    let data = sonic_rs::to_vec_pretty(status).context("序列化凭证状态失败")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).context("写入凭证状态文件失败")?;
    std::fs::rename(&tmp, path).context("替换凭证状态文件失败")
}

/// 固定凭证表，测试用。
#[cfg(test)]
#[derive(Debug, Default)]
pub struct StaticCredentials(pub HashMap<String, Vec<Credential>>);

#[cfg(test)]
impl StaticCredentials {
    pub fn with(provider_id: &str, raw: &[&str]) -> Self {
        let mut map = HashMap::new();
        map.insert(
            provider_id.to_string(),
            raw.iter().map(|t| Credential::new(*t)).collect(),
        );
        Self(map)
    }
}

#[cfg(test)]
impl CredentialSource for StaticCredentials {
    fn credentials(&self, provider_id: &str) -> Vec<Credential> {
        self.0.get(provider_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn pool_with(clock: Arc<ManualClock>, raw: &[&str]) -> CredentialPool {
        CredentialPool::new(Arc::new(StaticCredentials::with("p", raw)), clock)
    }

    #[test]
    fn next_available_skips_exhausted_in_stable_order() {
        let clock = Arc::new(ManualClock::at("2025-01-01T08:00:00Z"));
        let pool = pool_with(clock, &["A", "B", "C"]);

        assert_eq!(pool.next_available("p"), Some(Credential::new("A")));
        pool.mark_exhausted("p", &Credential::new("A"));
        assert_eq!(pool.next_available("p"), Some(Credential::new("B")));
        // 重复标记不会影响顺序。
        pool.mark_exhausted("p", &Credential::new("A"));
        assert_eq!(pool.next_available("p"), Some(Credential::new("B")));

        assert_eq!(
            pool.stats("p"),
            PoolStats {
                total: 3,
                active: 2,
                exhausted: 1
            }
        );
    }

    #[test]
    fn all_exhausted_returns_none() {
        let clock = Arc::new(ManualClock::at("2025-01-01T08:00:00Z"));
        let pool = pool_with(clock, &["A"]);
        pool.mark_exhausted("p", &Credential::new("A"));
        assert_eq!(pool.next_available("p"), None);
        assert_eq!(pool.first_for_status_check("p"), Some(Credential::new("A")));
    }

    #[test]
    fn empty_pool_has_no_credentials() {
        let clock = Arc::new(ManualClock::at("2025-01-01T08:00:00Z"));
        let pool = pool_with(clock, &[]);
        assert_eq!(pool.credential_count("p"), 0);
        assert_eq!(pool.next_available("p"), None);
        assert_eq!(pool.stats("unknown").total, 0);
    }

    #[test]
    fn exhaustion_resets_lazily_when_day_advances() {
        let clock = Arc::new(ManualClock::at("2025-01-01T23:00:00Z"));
        let pool = pool_with(clock.clone(), &["A", "B"]);
        pool.mark_exhausted("p", &Credential::new("A"));
        assert_eq!(pool.stats("p").active, 1);

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(pool.stats("p").active, 2);
        assert_eq!(pool.next_available("p"), Some(Credential::new("A")));
    }

    #[test]
    fn day_boundary_is_per_provider() {
        // UTC 15:00 = 北京时间 23:00；再过 2 小时北京已跨日而 UTC 没有。
        let clock = Arc::new(ManualClock::at("2025-01-01T15:00:00Z"));
        let mut map = HashMap::new();
        map.insert("cn".to_string(), vec![Credential::new("A")]);
        map.insert("global".to_string(), vec![Credential::new("A")]);
        let pool = CredentialPool::new(Arc::new(StaticCredentials(map)), clock.clone())
            .with_day_boundary("cn", DayBoundary::beijing());

        pool.mark_exhausted("cn", &Credential::new("A"));
        pool.mark_exhausted("global", &Credential::new("A"));

        clock.set(clock.now() + chrono::Duration::hours(2));
        assert_eq!(pool.next_available("cn"), Some(Credential::new("A")));
        assert_eq!(pool.next_available("global"), None);
    }

    #[test]
    fn exhaustion_survives_reload_from_status_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credential_status.json");
        let clock = Arc::new(ManualClock::at("2025-01-01T08:00:00Z"));

        let pool = pool_with(clock.clone(), &["A", "B"]).with_status_file(&path);
        pool.mark_exhausted("p", &Credential::new("A"));
        assert!(path.exists());

        let reloaded = pool_with(clock, &["A", "B"]).with_status_file(&path);
        assert_eq!(reloaded.next_available("p"), Some(Credential::new("B")));
    }

    #[test]
    fn corrupt_status_file_starts_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credential_status.json");
        std::fs::write(&path, b"{not json").unwrap();

        let clock = Arc::new(ManualClock::at("2025-01-01T08:00:00Z"));
        let pool = pool_with(clock, &["A"]).with_status_file(&path);
        assert_eq!(pool.next_available("p"), Some(Credential::new("A")));
    }
}
