//! 半开时间区间 `[start, stop)`

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 时间区间，包含 `start`，不包含 `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeSpan {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        debug_assert!(start < stop, "区间起点必须早于终点");
        Self { start, stop }
    }

    /// 时间戳是否落在区间内
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.stop
    }

    pub fn length(&self) -> Duration {
        self.stop - self.start
    }

    /// 紧随其后、等长的下一个区间
    pub fn next(&self) -> Self {
        Self::new(self.stop, self.stop + self.length())
    }

    /// 按归档间隔对齐，返回包含 `ts` 的区间
    ///
    /// 间隔为零时退化为一秒
    pub fn aligned(ts: DateTime<Utc>, interval: Duration) -> Self {
        let interval = if interval <= Duration::zero() {
            Duration::seconds(1)
        } else {
            interval
        };
        let start = ts.duration_trunc(interval).unwrap_or(ts);
        Self::new(start, start + interval)
    }

    /// 包含 `ts` 的 UTC 自然日
    pub fn day_containing(ts: DateTime<Utc>) -> Self {
        Self::aligned(ts, Duration::days(1))
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.stop.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
