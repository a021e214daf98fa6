//! 累积引擎错误类型
//!
//! 逐条采样错误只丢弃当前采样；致命错误意味着累积契约无法继续履行

use chrono::{DateTime, Utc};

use crate::accum::strategy::AccumulatorKind;
use crate::timespan::TimeSpan;
use crate::units::{Unit, UnitGroup, UnitSystem};

/// 累积引擎错误
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AccumError {
    #[error("单位组不匹配: 无法将 {from_unit} ({from_group}) 转换为 {to_unit} ({to_group})")]
    UnitGroupMismatch {
        from_unit: Unit,
        from_group: UnitGroup,
        to_unit: Unit,
        to_group: UnitGroup,
    },

    #[error("单位制不匹配: {obs_type} 期望 {expected}，实际为 {found}")]
    UnitSystemMismatch {
        obs_type: String,
        expected: UnitSystem,
        found: UnitSystem,
    },

    #[error("缺少配对字段: {obs_type} 需要 {field}")]
    MissingPairedField { obs_type: String, field: String },

    #[error("采样超出区间: {obs_type} @ {timestamp} 不在 {span} 内")]
    SampleOutOfRange {
        obs_type: String,
        timestamp: DateTime<Utc>,
        span: TimeSpan,
    },

    #[error("累积器已封存: {obs_type}")]
    AccumulatorFinalized { obs_type: String },

    #[error("未知的策略类型: {category} = '{name}'")]
    UnknownStrategyKind { category: &'static str, name: String },

    #[error("策略与累积器类型不兼容: {obs_type} 的 {strategy} 不能用于 {kind}")]
    IncompatibleStrategy {
        obs_type: String,
        strategy: String,
        kind: AccumulatorKind,
    },

    #[error("累积器类型不一致: 期望 {expected}，实际为 {found}")]
    KindMismatch {
        expected: AccumulatorKind,
        found: AccumulatorKind,
    },
}

impl AccumError {
    /// 是否为致命错误（配置或程序错误）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AccumError::UnitGroupMismatch { .. }
                | AccumError::UnknownStrategyKind { .. }
                | AccumError::IncompatibleStrategy { .. }
                | AccumError::KindMismatch { .. }
        )
    }

    /// 错误类别名称，用于统计
    pub fn kind_name(&self) -> &'static str {
        match self {
            AccumError::UnitGroupMismatch { .. } => "unit_group_mismatch",
            AccumError::UnitSystemMismatch { .. } => "unit_system_mismatch",
            AccumError::MissingPairedField { .. } => "missing_paired_field",
            AccumError::SampleOutOfRange { .. } => "sample_out_of_range",
            AccumError::AccumulatorFinalized { .. } => "accumulator_finalized",
            AccumError::UnknownStrategyKind { .. } => "unknown_strategy_kind",
            AccumError::IncompatibleStrategy { .. } => "incompatible_strategy",
            AccumError::KindMismatch { .. } => "kind_mismatch",
        }
    }
}

/// 累积结果类型
pub type AccumResult<T> = Result<T, AccumError>;
