//! 首末值累积

use chrono::{DateTime, Utc};

use super::Stamped;
use crate::error::AccumResult;
use crate::units::Unit;

/// 只记录第一个与最后一个观测值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirstLastStats {
    pub(crate) first: Option<Stamped>,
    pub(crate) last: Option<Stamped>,
}

impl FirstLastStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按到达顺序更新：first 只写一次，last 每次覆盖
    pub fn add(&mut self, value: f64, time: DateTime<Utc>) {
        let stamped = Stamped { value, time };
        if self.first.is_none() {
            self.first = Some(stamped);
        }
        self.last = Some(stamped);
    }

    /// 合并另一段统计：保留时间最早的 first 与最晚的 last
    pub fn merge(&mut self, other: &FirstLastStats) {
        if let Some(theirs) = other.first {
            match self.first {
                Some(ours) if ours.time <= theirs.time => {}
                _ => self.first = Some(theirs),
            }
        }
        if let Some(theirs) = other.last {
            match self.last {
                Some(ours) if ours.time > theirs.time => {}
                _ => self.last = Some(theirs),
            }
        }
    }

    pub(crate) fn convert(&self, from: Unit, to: Unit) -> AccumResult<Self> {
        Ok(Self {
            first: self.first.map(|s| s.convert(from, to)).transpose()?,
            last: self.last.map(|s| s.convert(from, to)).transpose()?,
        })
    }

    pub fn first(&self) -> Option<f64> {
        self.first.map(|s| s.value)
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.first.map(|s| s.time)
    }

    pub fn last(&self) -> Option<f64> {
        self.last.map(|s| s.value)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last.map(|s| s.time)
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}
