//! 采样与 LOOP 数据包
//!
//! 驱动每次读数产生一个数据包，数据包按观测类型展开为采样

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::accum::strategy::StrategyRegistry;
use crate::units::{obs_group, Unit, UnitGroup, UnitSystem, ValueTuple};

/// 单个观测类型的一次采样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// 观测类型名称
    pub obs_type: String,
    /// 采样时间
    pub timestamp: DateTime<Utc>,
    /// 采样值（可能为空）
    pub value: Option<ValueTuple>,
    /// 采样声明的单位制
    pub unit_system: UnitSystem,
    /// 配对的方向字段：`None` 表示上下文中没有该字段
    pub direction: Option<ValueTuple>,
}

impl Sample {
    /// 创建标量采样
    pub fn scalar(
        obs_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Option<ValueTuple>,
        unit_system: UnitSystem,
    ) -> Self {
        Self {
            obs_type: obs_type.into(),
            timestamp,
            value,
            unit_system,
            direction: None,
        }
    }

    /// 创建带方向的矢量采样
    pub fn vector(
        obs_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        speed: Option<ValueTuple>,
        direction: Option<ValueTuple>,
        unit_system: UnitSystem,
    ) -> Self {
        Self {
            obs_type: obs_type.into(),
            timestamp,
            value: speed,
            unit_system,
            direction,
        }
    }

    /// 采样的数值部分（空值或缺失均返回 `None`）
    pub fn magnitude(&self) -> Option<f64> {
        self.value.and_then(|v| v.magnitude())
    }
}

/// 驱动产生的 LOOP 数据包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub timestamp: DateTime<Utc>,
    pub unit_system: UnitSystem,
    /// 原始读数，数值单位由 `unit_system` 决定
    pub fields: BTreeMap<String, Option<f64>>,
}

impl Packet {
    pub fn new(timestamp: DateTime<Utc>, unit_system: UnitSystem) -> Self {
        Self {
            timestamp,
            unit_system,
            fields: BTreeMap::new(),
        }
    }

    /// 添加字段（构建器风格）
    pub fn with(mut self, obs_type: &str, value: Option<f64>) -> Self {
        self.fields.insert(obs_type.to_string(), value);
        self
    }

    /// 读取字段并标注单位；`None` 表示数据包中没有该字段
    pub fn value_of(&self, obs_type: &str) -> Option<ValueTuple> {
        self.fields
            .get(obs_type)
            .map(|raw| ValueTuple::new(*raw, self.unit_system.unit_for(obs_group(obs_type))))
    }

    /// 按策略注册表展开为采样
    ///
    /// 顺序：`usUnits`、`dateTime`、各字段、矢量配对
    pub fn to_samples(&self, registry: &StrategyRegistry) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(self.fields.len() + 3);

        samples.push(Sample::scalar(
            "usUnits",
            self.timestamp,
            Some(ValueTuple::some(self.unit_system.code() as f64, Unit::Count)),
            self.unit_system,
        ));
        samples.push(Sample::scalar(
            "dateTime",
            self.timestamp,
            Some(ValueTuple::some(
                self.timestamp.timestamp() as f64,
                self.unit_system.unit_for(UnitGroup::Time),
            )),
            self.unit_system,
        ));

        for obs_type in self.fields.keys() {
            samples.push(Sample::scalar(
                obs_type.as_str(),
                self.timestamp,
                self.value_of(obs_type),
                self.unit_system,
            ));
        }

        for binding in registry.vector_pairings() {
            let Some(pairing) = &binding.pairing else {
                continue;
            };
            if let Some(speed) = self.value_of(&pairing.magnitude) {
                samples.push(Sample::vector(
                    binding.obs_type.as_str(),
                    self.timestamp,
                    Some(speed),
                    self.value_of(&pairing.direction),
                    self.unit_system,
                ));
            }
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_packet_expansion() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let packet = Packet::new(ts, UnitSystem::Us)
            .with("outTemp", Some(68.0))
            .with("windSpeed", Some(5.0))
            .with("windDir", None);

        let registry = StrategyRegistry::with_defaults();
        let samples = packet.to_samples(&registry);

        let out_temp = samples.iter().find(|s| s.obs_type == "outTemp").unwrap();
        assert_eq!(out_temp.value.unwrap().unit(), Unit::DegreeF);

        let wind = samples.iter().find(|s| s.obs_type == "wind").unwrap();
        assert_eq!(wind.magnitude(), Some(5.0));
        // windDir 存在但为空
        assert!(wind.direction.unwrap().is_null());

        assert_eq!(samples[0].obs_type, "usUnits");
    }

    #[test]
    fn test_missing_direction_field() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let packet = Packet::new(ts, UnitSystem::MetricWx).with("windSpeed", Some(3.0));

        let samples = packet.to_samples(&StrategyRegistry::with_defaults());
        let wind = samples.iter().find(|s| s.obs_type == "wind").unwrap();
        assert!(wind.direction.is_none());
    }
}
