use accum_engine::config::{Cli, Commands, Config};
use accum_engine::engine::Engine;
use accum_engine::storage::{AggregateStore, Storage};
use accum_engine::timespan::TimeSpan;
use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use clap::{CommandFactory, Parser};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let cli = Cli::parse();

    // 补全脚本不需要配置与日志
    if let Some(Commands::Completions { shell }) = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "accum-engine", &mut std::io::stdout());
        return Ok(());
    }

    // 加载配置
    let config = Config::load_with_cli(cli.clone())?;

    // 初始化日志系统，guard 需存活到退出
    let _log_guard = config.init_logging()?;

    tracing::info!("Accum Engine Starting...");

    // 处理命令行子命令
    if let Some(command) = cli.command {
        handle_command(command, &config).await?;
        return Ok(());
    }

    let engine = Engine::new(config).await?;

    tracing::info!("Accum Engine Ready!");

    // 运行引擎（包含优雅关闭）
    engine.run().await?;

    Ok(())
}

async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run => {
            // 这是默认行为，直接运行引擎
            let engine = Engine::new(config.clone()).await?;
            engine.run().await?;
        }
        Commands::ListStrategies => {
            let registry = config.registry()?;

            println!(
                "{:<24} {:<10} {:<12} {:<8} {:<8} 配对字段",
                "观测类型", "累积器", "加入", "合并", "提取"
            );
            for binding in registry.sorted() {
                let pairing = binding
                    .pairing
                    .as_ref()
                    .map(|p| format!("{} + {}", p.magnitude, p.direction))
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<10} {:<12} {:<8} {:<8} {}",
                    binding.obs_type,
                    binding.accumulator,
                    binding.adder,
                    binding.merger,
                    binding.extractor,
                    pairing
                );
            }
            println!("其余观测类型: scalar / add / minmax / avg");
        }
        Commands::DaySummary { obs_type, date } => {
            let date: NaiveDate = date.unwrap_or_else(|| Utc::now().date_naive());
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow!("无效的日期: {}", date))?
                .and_utc();
            let day = TimeSpan::day_containing(midnight);

            let storage = Storage::new(&config.database.url).await?;
            match storage.aggregate(&obs_type, &day).await? {
                Some(aggregate) => {
                    println!("{}", serde_json::to_string_pretty(&aggregate)?);
                    if let Some(avg) = aggregate.average() {
                        println!("均值: {avg:.3}");
                    }
                }
                None => println!("{} 在 {} 没有运行聚合", obs_type, date),
            }
        }
        Commands::ResetConfig => {
            // 重置配置
            if let Some(config_path) = Config::get_user_config_path() {
                Config::with_default_strategies().save_to_file(&config_path)?;
                println!("配置已重置到: {}", config_path.display());
            } else {
                println!("无法确定配置文件路径");
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
