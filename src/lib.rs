//! Accum Engine - 气象观测累积引擎
//!
//! 将驱动产生的不规则采样累积为固定间隔的归档记录，并合并进按日运行聚合

pub mod accum;
pub mod config;
pub mod engine;
pub mod error;
pub mod sample;
pub mod storage;
pub mod timespan;
pub mod units;

pub use anyhow::Result;
pub use error::{AccumError, AccumResult};
