//! 配置系统模块
//!
//! 统一处理 TOML 配置文件、环境变量、命令行参数

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use config::{Config as ConfigBuilder, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::accum::strategy::{default_specs, StrategyRegistry, StrategySpec};
use crate::engine::dispatch::DispatchSettings;
use crate::units::UnitSystem;

/// 一天的秒数，归档间隔必须能整除
const SECONDS_PER_DAY: u64 = 86_400;

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(name = "accum-engine")]
#[command(about = "气象观测累积引擎 - 将不规则采样归档为固定间隔记录与日汇总")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// 数据库 URL
    #[arg(short, long)]
    pub database_url: Option<String>,

    /// 归档间隔（秒）
    #[arg(short, long)]
    pub archive_interval: Option<u64>,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// 支持的命令
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 运行引擎
    Run,
    /// 列出观测类型的累积策略
    ListStrategies,
    /// 查看某天的运行聚合
    DaySummary {
        /// 观测类型
        obs_type: String,
        /// 日期（UTC，默认今天）
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// 重置配置
    ResetConfig,
    /// 生成 shell 补全脚本
    Completions {
        /// 目标 shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// 日志级别
#[derive(clap::ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 引擎配置
    pub engine: EngineConfig,
    /// 气象站配置
    pub station: StationConfig,
    /// 按观测类型覆盖的累积策略
    pub accumulator: Vec<StrategySpec>,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库 URL
    pub url: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 日志格式
    pub format: LogFormat,
    /// 日志输出目录
    pub directory: Option<PathBuf>,
}

/// 日志格式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 简洁格式
    Compact,
    /// 详细格式
    Full,
    /// JSON 格式
    Json,
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 归档间隔（秒）
    pub archive_interval_secs: u64,
    /// 区间结束后等待迟到采样的时间（秒）
    pub archive_delay_secs: u64,
    /// 属于后续区间的缓冲采样上限
    pub max_pending_samples: usize,
    /// 调度通道容量
    pub channel_buffer: usize,
}

/// 气象站配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// LOOP 数据包间隔（毫秒）
    pub loop_interval_ms: u64,
    /// 驱动输出的单位制
    pub unit_system: UnitSystem,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:accum-engine.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            directory: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            archive_interval_secs: 300,
            archive_delay_secs: 15,
            max_pending_samples: 10_000,
            channel_buffer: 1000,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: 2000,
            unit_system: UnitSystem::Us,
        }
    }
}

impl EngineConfig {
    pub fn archive_interval(&self) -> Duration {
        Duration::seconds(self.archive_interval_secs as i64)
    }

    pub fn archive_delay(&self) -> Duration {
        Duration::seconds(self.archive_delay_secs as i64)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            archive_interval: self.archive_interval(),
            max_pending_samples: self.max_pending_samples,
            channel_buffer: self.channel_buffer,
        }
    }
}

impl Config {
    /// 从多种配置源加载配置
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();
        Self::load_with_cli(cli)
    }

    /// 使用指定的 CLI 参数加载配置
    pub fn load_with_cli(cli: Cli) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // 1. 首先加载默认配置
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // 2. 加载系统配置文件
        if let Some(system_config) = Self::get_system_config_path() {
            if system_config.exists() {
                builder = builder.add_source(File::from(system_config));
            }
        }

        // 3. 加载用户配置文件
        if let Some(user_config) = Self::get_user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(File::from(user_config));
            }
        }

        // 4. 加载指定的配置文件
        if let Some(config_path) = cli.config {
            if config_path.exists() {
                builder = builder.add_source(File::from(config_path));
            } else {
                return Err(anyhow!("配置文件不存在: {}", config_path.display()));
            }
        }

        // 5. 加载环境变量（前缀 ACCUM_ENGINE_）
        builder = builder.add_source(
            Environment::with_prefix("ACCUM_ENGINE")
                .prefix_separator("_")
                .separator("__"),
        );

        // 6. 构建配置
        let mut config: Config = builder.build()?.try_deserialize()?;

        // 7. 应用命令行参数覆盖
        if let Some(log_level) = cli.log_level {
            config.logging.level = log_level;
        }

        if let Some(database_url) = cli.database_url {
            config.database.url = database_url;
        }

        if let Some(interval) = cli.archive_interval {
            config.engine.archive_interval_secs = interval;
        }

        // 8. 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 获取系统配置文件路径
    pub fn get_system_config_path() -> Option<PathBuf> {
        Some(PathBuf::from("/etc/accum-engine/config.toml"))
    }

    /// 获取用户配置文件路径
    pub fn get_user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "accum-engine")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// 默认配置，附带内置策略表便于修改
    pub fn with_default_strategies() -> Self {
        Config {
            accumulator: default_specs(),
            ..Config::default()
        }
    }

    /// 生成默认配置文件
    pub fn generate_default_config() -> Result<String> {
        toml::to_string_pretty(&Self::with_default_strategies())
            .map_err(|e| anyhow!("生成默认配置失败: {}", e))
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| anyhow!("序列化配置失败: {}", e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// 由内置绑定与配置覆盖构建策略注册表
    pub fn registry(&self) -> Result<StrategyRegistry> {
        StrategyRegistry::from_specs(&self.accumulator)
            .map_err(|e| anyhow!("累积策略配置无效: {}", e))
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        // 验证数据库 URL
        if self.database.url.is_empty() {
            return Err(anyhow!("数据库 URL 不能为空"));
        }

        // 验证日志目录
        if let Some(log_dir) = &self.logging.directory {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir)?;
            }
        }

        // 验证归档间隔
        let interval = self.engine.archive_interval_secs;
        if interval == 0 || SECONDS_PER_DAY % interval != 0 {
            return Err(anyhow!("归档间隔必须为正且能整除一天: {} 秒", interval));
        }
        if self.engine.archive_delay_secs >= interval {
            return Err(anyhow!(
                "归档延迟（{} 秒）必须小于归档间隔（{} 秒）",
                self.engine.archive_delay_secs,
                interval
            ));
        }
        if self.engine.channel_buffer == 0 {
            return Err(anyhow!("调度通道容量不能为 0"));
        }

        if self.station.loop_interval_ms == 0 {
            return Err(anyhow!("LOOP 间隔不能为 0"));
        }

        // 未知的策略名在启动时失败
        self.registry()?;

        Ok(())
    }

    /// 初始化日志系统
    ///
    /// 写文件时返回的 guard 必须存活到程序结束，否则缓冲中的日志会丢失
    pub fn init_logging(&self) -> Result<Option<WorkerGuard>> {
        let level_filter = EnvFilter::builder()
            .with_default_directive(Level::from(self.logging.level.clone()).into())
            .from_env_lossy();

        let (file_writer, guard) = match &self.logging.directory {
            Some(log_dir) => {
                std::fs::create_dir_all(log_dir)?;
                let file_appender = tracing_appender::rolling::daily(log_dir, "accum-engine.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                (Some(non_blocking), Some(guard))
            }
            None => (None, None),
        };

        let registry = tracing_subscriber::registry().with(level_filter);

        // 根据格式选择不同的输出层
        let result = match self.logging.format {
            LogFormat::Compact => registry
                .with(fmt::layer().compact())
                .with(file_writer.map(|w| fmt::layer().compact().with_ansi(false).with_writer(w)))
                .try_init(),
            LogFormat::Full => registry
                .with(fmt::layer())
                .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_target(true).with_level(true))
                .with(file_writer.map(|w| fmt::layer().json().with_writer(w)))
                .try_init(),
        };
        result.map_err(|e| anyhow!("日志系统初始化失败: {}", e))?;

        tracing::info!("日志系统已初始化，级别: {:?}", self.logging.level);
        Ok(guard)
    }
}
