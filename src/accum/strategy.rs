//! 累积策略注册表
//!
//! 配置中的字符串在启动时一次性解析为封闭的枚举，热路径上不再做字符串分派

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{AccumError, AccumResult};

/// 累积器类型，决定累积状态的形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulatorKind {
    Scalar,
    Vector,
    FirstLast,
}

/// 加入策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdderKind {
    Add,
    AddWind,
    CheckUnits,
    Noop,
}

/// 合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergerKind {
    MinMax,
    Avg,
}

/// 提取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Avg,
    Sum,
    Count,
    Min,
    Max,
    First,
    Last,
    Noop,
    Wind,
}

macro_rules! kind_names {
    ($ty:ident, $category:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = AccumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(AccumError::UnknownStrategyKind {
                        category: $category,
                        name: other.to_string(),
                    }),
                }
            }
        }
    };
}

kind_names!(AccumulatorKind, "accumulator", {
    Scalar => "scalar",
    Vector => "vector",
    FirstLast => "firstlast",
});

kind_names!(AdderKind, "adder", {
    Add => "add",
    AddWind => "add_wind",
    CheckUnits => "check_units",
    Noop => "noop",
});

kind_names!(MergerKind, "merger", {
    MinMax => "minmax",
    Avg => "avg",
});

kind_names!(ExtractorKind, "extractor", {
    Avg => "avg",
    Sum => "sum",
    Count => "count",
    Min => "min",
    Max => "max",
    First => "first",
    Last => "last",
    Noop => "noop",
    Wind => "wind",
});

/// 矢量累积器的来源字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorPairing {
    /// 大小字段（如 `windSpeed`）
    pub magnitude: String,
    /// 方向字段（如 `windDir`）
    pub direction: String,
}

/// 单个观测类型的策略绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyBinding {
    pub obs_type: String,
    pub accumulator: AccumulatorKind,
    pub adder: AdderKind,
    pub merger: MergerKind,
    pub extractor: ExtractorKind,
    pub pairing: Option<VectorPairing>,
}

impl StrategyBinding {
    /// 系统默认绑定：`scalar / add / minmax / avg`
    pub fn default_for(obs_type: impl Into<String>) -> Self {
        Self {
            obs_type: obs_type.into(),
            accumulator: AccumulatorKind::Scalar,
            adder: AdderKind::Add,
            merger: MergerKind::MinMax,
            extractor: ExtractorKind::Avg,
            pairing: None,
        }
    }

    fn with_accumulator(mut self, kind: AccumulatorKind) -> Self {
        self.accumulator = kind;
        self
    }

    fn with_adder(mut self, adder: AdderKind) -> Self {
        self.adder = adder;
        self
    }

    fn with_extractor(mut self, extractor: ExtractorKind) -> Self {
        self.extractor = extractor;
        self
    }

    fn with_pairing(mut self, magnitude: &str, direction: &str) -> Self {
        self.pairing = Some(VectorPairing {
            magnitude: magnitude.to_string(),
            direction: direction.to_string(),
        });
        self
    }

    /// 从配置项解析，未给出的字段使用默认值
    pub fn from_spec(spec: &StrategySpec) -> AccumResult<Self> {
        let mut binding = Self::default_for(spec.obs_type.clone());

        if let Some(name) = &spec.accumulator {
            binding.accumulator = name.parse()?;
        }
        if let Some(name) = &spec.adder {
            binding.adder = name.parse()?;
        }
        if let Some(name) = &spec.merger {
            binding.merger = name.parse()?;
        }
        if let Some(name) = &spec.extractor {
            binding.extractor = name.parse()?;
        }
        binding.pairing = match (&spec.magnitude_field, &spec.direction_field) {
            (Some(magnitude), Some(direction)) => Some(VectorPairing {
                magnitude: magnitude.clone(),
                direction: direction.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(AccumError::IncompatibleStrategy {
                    obs_type: spec.obs_type.clone(),
                    strategy: "magnitude_field/direction_field 必须同时给出".to_string(),
                    kind: binding.accumulator,
                })
            }
        };

        binding.validate()?;
        Ok(binding)
    }

    /// 校验加入/提取策略与累积器类型是否兼容
    pub fn validate(&self) -> AccumResult<()> {
        use AccumulatorKind::*;

        let incompatible = |strategy: String| AccumError::IncompatibleStrategy {
            obs_type: self.obs_type.clone(),
            strategy,
            kind: self.accumulator,
        };

        if self.adder == AdderKind::AddWind && self.accumulator != Vector {
            return Err(incompatible(format!("adder={}", self.adder)));
        }

        let extractor_ok = match self.extractor {
            ExtractorKind::Avg
            | ExtractorKind::Sum
            | ExtractorKind::Count
            | ExtractorKind::Min
            | ExtractorKind::Max => matches!(self.accumulator, Scalar | Vector),
            ExtractorKind::Wind => self.accumulator == Vector,
            ExtractorKind::First | ExtractorKind::Last | ExtractorKind::Noop => true,
        };
        if !extractor_ok {
            return Err(incompatible(format!("extractor={}", self.extractor)));
        }

        if self.pairing.is_some() && self.accumulator != Vector {
            return Err(incompatible("pairing".to_string()));
        }

        Ok(())
    }
}

/// 配置文件中的 `[[accumulator]]` 条目（未解析的字符串形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub obs_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_field: Option<String>,
}

impl From<&StrategyBinding> for StrategySpec {
    fn from(binding: &StrategyBinding) -> Self {
        let defaults = StrategyBinding::default_for("");
        let differs = |same: bool, name: &str| (!same).then(|| name.to_string());

        Self {
            obs_type: binding.obs_type.clone(),
            accumulator: differs(
                binding.accumulator == defaults.accumulator,
                binding.accumulator.name(),
            ),
            adder: differs(binding.adder == defaults.adder, binding.adder.name()),
            merger: differs(binding.merger == defaults.merger, binding.merger.name()),
            extractor: differs(
                binding.extractor == defaults.extractor,
                binding.extractor.name(),
            ),
            magnitude_field: binding.pairing.as_ref().map(|p| p.magnitude.clone()),
            direction_field: binding.pairing.as_ref().map(|p| p.direction.clone()),
        }
    }
}

/// 内置绑定表
pub fn default_bindings() -> Vec<StrategyBinding> {
    use AccumulatorKind::*;
    use AdderKind::*;

    let mut bindings = vec![
        StrategyBinding::default_for("dateTime")
            .with_adder(Noop)
            .with_extractor(ExtractorKind::Noop),
        StrategyBinding::default_for("usUnits")
            .with_adder(CheckUnits)
            .with_extractor(ExtractorKind::Noop),
        StrategyBinding::default_for("interval")
            .with_adder(Noop)
            .with_extractor(ExtractorKind::Noop),
        StrategyBinding::default_for("wind")
            .with_accumulator(Vector)
            .with_adder(AddWind)
            .with_extractor(ExtractorKind::Wind)
            .with_pairing("windSpeed", "windDir"),
    ];

    // 由 wind 提取器输出
    for obs_type in ["windSpeed", "windDir", "windGust", "windGustDir"] {
        bindings.push(StrategyBinding::default_for(obs_type).with_extractor(ExtractorKind::Noop));
    }

    for obs_type in ["rain", "ET", "hail", "lightning_strike_count"] {
        bindings.push(StrategyBinding::default_for(obs_type).with_extractor(ExtractorKind::Sum));
    }

    // 驱动自带的累计量，只保留最后一次读数
    for obs_type in [
        "dayRain", "monthRain", "yearRain", "stormRain", "totalRain", "dayET", "monthET",
        "yearET",
    ] {
        bindings.push(
            StrategyBinding::default_for(obs_type)
                .with_accumulator(FirstLast)
                .with_extractor(ExtractorKind::Last),
        );
    }

    bindings
}

/// 内置绑定表的配置形式
pub fn default_specs() -> Vec<StrategySpec> {
    default_bindings().iter().map(StrategySpec::from).collect()
}

/// 策略注册表：观测类型 -> 策略绑定
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    bindings: HashMap<String, StrategyBinding>,
    /// 未显式配置的类型使用的绑定
    fallback: StrategyBinding,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    /// 空注册表，所有类型都使用系统默认
    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
            fallback: StrategyBinding::default_for("*"),
        }
    }

    /// 带内置绑定表的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for binding in default_bindings() {
            registry.bindings.insert(binding.obs_type.clone(), binding);
        }
        registry
    }

    /// 内置绑定之上叠加配置项，任一项无效则启动失败
    pub fn from_specs(specs: &[StrategySpec]) -> AccumResult<Self> {
        let mut registry = Self::with_defaults();
        for spec in specs {
            registry.insert(StrategyBinding::from_spec(spec)?)?;
        }
        tracing::debug!("策略注册表已构建，共 {} 个显式绑定", registry.len());
        Ok(registry)
    }

    /// 添加或覆盖绑定
    pub fn insert(&mut self, binding: StrategyBinding) -> AccumResult<()> {
        binding.validate()?;
        if let Some(previous) = self.bindings.insert(binding.obs_type.clone(), binding) {
            tracing::trace!("覆盖观测类型 {} 的策略绑定", previous.obs_type);
        }
        Ok(())
    }

    /// 查找绑定，未配置的类型返回系统默认
    pub fn lookup(&self, obs_type: &str) -> &StrategyBinding {
        self.bindings.get(obs_type).unwrap_or(&self.fallback)
    }

    /// 是否有显式绑定
    pub fn contains(&self, obs_type: &str) -> bool {
        self.bindings.contains_key(obs_type)
    }

    /// 带矢量配对的绑定
    pub fn vector_pairings(&self) -> impl Iterator<Item = &StrategyBinding> {
        self.bindings.values().filter(|b| b.pairing.is_some())
    }

    /// 按观测类型排序的全部显式绑定
    pub fn sorted(&self) -> Vec<&StrategyBinding> {
        let mut bindings: Vec<_> = self.bindings.values().collect();
        bindings.sort_by(|a, b| a.obs_type.cmp(&b.obs_type));
        bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
