//! 带单位的数值

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Unit, UnitGroup, UnitSystem};
use crate::error::AccumResult;

/// 不可变的 `(数值, 单位, 单位组)` 三元组
///
/// 数值可以为空（传感器缺失），空值在运算中传播而不是报错
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueTuple {
    magnitude: Option<f64>,
    unit: Unit,
    group: UnitGroup,
}

impl ValueTuple {
    /// 创建数值，单位组由单位决定，保证 `unit ∈ units(group)`
    pub fn new(magnitude: Option<f64>, unit: Unit) -> Self {
        Self {
            magnitude,
            unit,
            group: unit.group(),
        }
    }

    pub fn some(magnitude: f64, unit: Unit) -> Self {
        Self::new(Some(magnitude), unit)
    }

    pub fn null(unit: Unit) -> Self {
        Self::new(None, unit)
    }

    pub fn magnitude(&self) -> Option<f64> {
        self.magnitude
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn group(&self) -> UnitGroup {
        self.group
    }

    pub fn is_null(&self) -> bool {
        self.magnitude.is_none()
    }

    /// 换算到同组的另一单位，产生新实例
    pub fn convert_to(&self, target: Unit) -> AccumResult<ValueTuple> {
        let magnitude = match self.magnitude {
            Some(x) => Some(self.unit.convert(x, target)?),
            None => {
                // 空值也要校验单位组
                self.unit.check_group(target)?;
                None
            }
        };
        Ok(ValueTuple::new(magnitude, target))
    }

    /// 换算到指定单位制下该组所用的单位
    pub fn convert_to_system(&self, system: UnitSystem) -> AccumResult<ValueTuple> {
        self.convert_to(system.unit_for(self.group))
    }

    /// 相加，右值先换算到左值单位；任一侧为空则结果为空
    pub fn try_add(&self, other: &ValueTuple) -> AccumResult<ValueTuple> {
        let other = other.convert_to(self.unit)?;
        let magnitude = match (self.magnitude, other.magnitude) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        Ok(ValueTuple::new(magnitude, self.unit))
    }
}

impl fmt::Display for ValueTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.magnitude {
            Some(x) => write!(f, "{x:.3} {}", self.unit),
            None => write!(f, "N/A {}", self.unit),
        }
    }
}
