//! 时间来源抽象。
//!
//! 凭证的"当日耗尽"判断与轮询调度都依赖当前时间，这里统一收口，
//! 测试中可用 `ManualClock` 手动拨动时间，而不必真的等待。

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 服务商的"自然日"边界。不同服务商的配额按各自时区的零点重置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary(FixedOffset);

impl DayBoundary {
    pub fn utc() -> Self {
        Self(utc_offset())
    }

    /// 北京时间 (UTC+8)
    pub fn beijing() -> Self {
        Self(FixedOffset::east_opt(8 * 3600).unwrap_or_else(utc_offset))
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.0).date_naive()
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// 测试用时钟：时间只在显式调用 `advance`/`set` 时前进。
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn at(rfc3339: &str) -> Self {
        let start = DateTime::parse_from_rfc3339(rfc3339)
            .expect("合法的 RFC3339 时间")
            .with_timezone(&Utc);
        Self::new(start)
    }

    pub fn advance(&self, d: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += d;
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = t;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beijing_day_rolls_over_before_utc() {
        // UTC 16:30 已是北京时间次日 00:30。
        let clock = ManualClock::at("2025-03-01T16:30:00Z");
        let now = clock.now();
        assert_eq!(
            DayBoundary::utc().today(now),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert_eq!(
            DayBoundary::beijing().today(now),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
        );
    }

    #[test]
    fn manual_clock_only_moves_when_told() {
        let clock = ManualClock::at("2025-03-01T00:00:00Z");
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(clock.now() - t0, chrono::Duration::seconds(10));
    }
}
