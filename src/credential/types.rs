use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;

/// 单个服务商凭证（API Token）。
///
/// 仅在执行器边界内暴露原文；Debug/Display 一律打码，避免被日志带出。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// 日志里展示的前缀形式，例如 `hf_abcde...`。
    pub fn masked(&self) -> String {
        crate::logging::mask_secret(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// 解析逗号分隔的凭证列表：去空白、丢弃空项、保持原有顺序并去重。
pub fn parse_credentials(raw: &str) -> Vec<Credential> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(Credential::new)
        .collect()
}

/// 某服务商凭证池的统计视图。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub exhausted: usize,
}

/// 单个服务商的当日耗尽记录（持久化形态）。
///
/// `exhausted` 只有在 `date` 等于该服务商"今天"时才有意义，跨日后视为空集。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExhaustionRecord {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub exhausted: HashSet<String>,
}

impl ExhaustionRecord {
    pub fn is_exhausted(&self, today: NaiveDate, credential: &Credential) -> bool {
        self.date == Some(today) && self.exhausted.contains(credential.expose())
    }

    /// 标记耗尽；返回是否产生了变化（重复标记为幂等 no-op）。
    pub fn mark(&mut self, today: NaiveDate, credential: &Credential) -> bool {
        if self.date != Some(today) {
            self.date = Some(today);
            self.exhausted.clear();
        }
        self.exhausted.insert(credential.expose().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_credentials_trims_and_dedups_in_order() {
        let creds = parse_credentials(" a , b,,a ,c ");
        let raw: Vec<&str> = creds.iter().map(Credential::expose).collect();
        assert_eq!(raw, vec!["a", "b", "c"]);
        assert!(parse_credentials("").is_empty());
        assert!(parse_credentials(" , ").is_empty());
    }

    #[test]
    fn debug_output_never_contains_full_secret() {
        let c = Credential::new("hf_0123456789abcdef");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("0123456789abcdef"));
        assert!(dbg.contains("hf_01234"));
    }

    #[test]
    fn stale_record_is_reset_on_mark() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let a = Credential::new("a");
        let b = Credential::new("b");

        let mut rec = ExhaustionRecord::default();
        assert!(rec.mark(d1, &a));
        assert!(!rec.mark(d1, &a));
        assert!(rec.is_exhausted(d1, &a));
        assert!(!rec.is_exhausted(d2, &a));

        assert!(rec.mark(d2, &b));
        assert!(!rec.is_exhausted(d2, &a));
        assert!(rec.is_exhausted(d2, &b));
    }
}
