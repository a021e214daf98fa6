//! 区间累积器集合
//!
//! 一个归档区间 `[start, stop)` 内所有观测类型的累积器。累积器按需创建，
//! `finalize` 消耗集合本身，区间封存后无法再被复用

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::strategy::{ExtractorKind, StrategyRegistry};
use super::Accumulator;
use crate::error::{AccumError, AccumResult};
use crate::sample::{Packet, Sample};
use crate::timespan::TimeSpan;
use crate::units::{UnitSystem, ValueTuple};

/// 一个区间的归档记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// 区间结束时间
    pub date_time: DateTime<Utc>,
    /// 区间长度（分钟）
    pub interval: i64,
    /// 记录的单位制，区间内没有采样时为空
    pub unit_system: Option<UnitSystem>,
    /// 观测类型 -> 提取值
    pub values: BTreeMap<String, Option<ValueTuple>>,
}

impl ArchiveRecord {
    /// 观测类型的数值部分
    pub fn magnitude(&self, obs_type: &str) -> Option<f64> {
        self.values.get(obs_type).copied().flatten()?.magnitude()
    }

    /// 记录中是否写入了该观测类型（值可能为空）
    pub fn contains(&self, obs_type: &str) -> bool {
        self.values.contains_key(obs_type)
    }
}

/// 封存后的区间：归档记录与已封存的累积器
#[derive(Debug, Clone)]
pub struct FinalizedInterval {
    pub span: TimeSpan,
    pub record: ArchiveRecord,
    pub accumulators: BTreeMap<String, Accumulator>,
}

/// 区间累积器集合
#[derive(Debug, Clone)]
pub struct IntervalAccumulator {
    span: TimeSpan,
    registry: Arc<StrategyRegistry>,
    accumulators: BTreeMap<String, Accumulator>,
    unit_system: Option<UnitSystem>,
}

impl IntervalAccumulator {
    pub fn new(span: TimeSpan, registry: Arc<StrategyRegistry>) -> Self {
        Self {
            span,
            registry,
            accumulators: BTreeMap::new(),
            unit_system: None,
        }
    }

    pub fn span(&self) -> TimeSpan {
        self.span
    }

    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }

    pub fn get(&self, obs_type: &str) -> Option<&Accumulator> {
        self.accumulators.get(obs_type)
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// 加入一个采样
    ///
    /// 时间戳不在区间内时返回 `SampleOutOfRange`，集合保持不变
    pub fn add_sample(&mut self, sample: &Sample) -> AccumResult<()> {
        if !self.span.contains(sample.timestamp) {
            return Err(AccumError::SampleOutOfRange {
                obs_type: sample.obs_type.clone(),
                timestamp: sample.timestamp,
                span: self.span,
            });
        }

        let binding = self.registry.lookup(&sample.obs_type);
        let result = match self.accumulators.get_mut(&sample.obs_type) {
            Some(acc) => acc.add(sample, binding.adder),
            None => {
                let mut acc = Accumulator::new(sample.obs_type.as_str(), binding.accumulator);
                let result = acc.add(sample, binding.adder);
                if result.is_ok() {
                    self.accumulators.insert(sample.obs_type.clone(), acc);
                }
                result
            }
        };

        match result {
            Ok(()) => {
                self.unit_system.get_or_insert(sample.unit_system);
                Ok(())
            }
            Err(AccumError::MissingPairedField { obs_type, .. }) => {
                let field = binding
                    .pairing
                    .as_ref()
                    .map_or_else(|| "direction".to_string(), |p| p.direction.clone());
                Err(AccumError::MissingPairedField { obs_type, field })
            }
            Err(e) => Err(e),
        }
    }

    /// 加入一个数据包的全部采样，逐条收集错误而不中断
    pub fn add_packet(&mut self, packet: &Packet) -> Vec<AccumError> {
        packet
            .to_samples(&self.registry)
            .iter()
            .filter_map(|sample| self.add_sample(sample).err())
            .collect()
    }

    /// 合并另一个集合的高低值与累加量（如硬件给出的区间统计）
    ///
    /// 对方的区间必须落在本区间内
    pub fn update_hilo(&mut self, other: &IntervalAccumulator) -> AccumResult<()> {
        if other.span.start < self.span.start || other.span.stop > self.span.stop {
            return Err(AccumError::SampleOutOfRange {
                obs_type: "*".to_string(),
                timestamp: other.span.start,
                span: self.span,
            });
        }

        for (obs_type, theirs) in &other.accumulators {
            match self.accumulators.get_mut(obs_type) {
                Some(ours) => ours.merge(theirs)?,
                None => {
                    let binding = self.registry.lookup(obs_type);
                    let mut acc = Accumulator::new(obs_type.as_str(), binding.accumulator);
                    acc.merge(theirs)?;
                    self.accumulators.insert(obs_type.clone(), acc);
                }
            }
        }
        if self.unit_system.is_none() {
            self.unit_system = other.unit_system;
        }
        Ok(())
    }

    /// 封存全部累积器并生成归档记录
    ///
    /// 记录中的值统一换算到集合的单位制；`noop` 提取器不写入记录
    pub fn finalize(self) -> AccumResult<FinalizedInterval> {
        let mut values = BTreeMap::new();

        let mut accumulators = self.accumulators;
        for (obs_type, acc) in accumulators.iter_mut() {
            acc.finalize();

            let extractor = self.registry.lookup(obs_type).extractor;
            if extractor == ExtractorKind::Noop {
                continue;
            }
            let view = match self.unit_system {
                Some(system) => acc.converted_to(system)?,
                None => acc.clone(),
            };

            if extractor == ExtractorKind::Wind {
                if let Some(wind) = view.extract_wind() {
                    for (name, value) in wind.fields() {
                        values.insert(name.to_string(), value);
                    }
                }
            } else {
                values.insert(obs_type.clone(), view.extract(extractor));
            }
        }

        let record = ArchiveRecord {
            date_time: self.span.stop,
            interval: self.span.length().num_minutes(),
            unit_system: self.unit_system,
            values,
        };
        tracing::debug!(
            "区间 {} 已封存，{} 个累积器，{} 个记录字段",
            self.span,
            accumulators.len(),
            record.values.len()
        );

        Ok(FinalizedInterval {
            span: self.span,
            record,
            accumulators,
        })
    }
}
