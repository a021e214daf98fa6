//! SQLite 存储集成测试
//!
//! 调度循环写入 SQLite，重启后重放同一区间不会重复合并

use accum_engine::accum::{IntervalAccumulator, StrategyRegistry};
use accum_engine::config::Config;
use accum_engine::engine::dispatch::{create_dispatcher, DispatchSettings};
use accum_engine::engine::merge::{MergeCoordinator, MergeOutcome};
use accum_engine::engine::Engine;
use accum_engine::sample::Packet;
use accum_engine::storage::{AggregateStore, Storage};
use accum_engine::timespan::TimeSpan;
use accum_engine::units::UnitSystem;
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
}

fn db_url(temp_dir: &TempDir) -> String {
    format!("sqlite:{}", temp_dir.path().join("weather.db").display())
}

#[tokio::test]
async fn test_dispatch_into_sqlite() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let storage = Arc::new(Storage::new(&db_url(&temp_dir)).await?);
    let registry = Arc::new(StrategyRegistry::with_defaults());

    let coordinator = MergeCoordinator::new(storage.clone(), registry.clone());
    let (handle, dispatch_loop) = create_dispatcher(
        &DispatchSettings::default(),
        t0(),
        registry,
        storage.clone(),
        coordinator,
    );
    let task = tokio::spawn(dispatch_loop.run());

    for (offset, temp, pressure) in [(0, 4.0, 1012.0), (100, 6.0, 1013.0), (200, 5.0, 1011.5)] {
        let packet = Packet::new(t0() + Duration::seconds(offset), UnitSystem::Metric)
            .with("outTemp", Some(temp))
            .with("barometer", Some(pressure))
            .with("dayRain", Some(offset as f64 / 100.0));
        handle.send_packet(packet).await?;
    }
    handle.boundary(t0() + Duration::minutes(5)).await?;
    handle.shutdown().await?;
    task.await??;

    let record = storage
        .get_record(t0() + Duration::minutes(5))
        .await?
        .expect("归档记录应已写入");
    assert_eq!(record.unit_system, Some(UnitSystem::Metric));
    assert_eq!(record.magnitude("outTemp"), Some(5.0));
    assert_eq!(record.magnitude("dayRain"), Some(2.0));
    assert!((record.magnitude("barometer").unwrap() - 1012.1666666).abs() < 1e-6);

    let day = TimeSpan::day_containing(t0());
    let summaries = storage.day_summaries(&day).await?;
    let names: Vec<_> = summaries.iter().map(|a| a.obs_type.as_str()).collect();
    assert_eq!(names, vec!["barometer", "dayRain", "outTemp"]);

    let records = storage.records_in(&day).await?;
    assert_eq!(records.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_replay_after_restart_is_skipped() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let registry = Arc::new(StrategyRegistry::with_defaults());
    let span = TimeSpan::new(t0(), t0() + Duration::minutes(5));

    let finalized = || {
        let mut interval = IntervalAccumulator::new(span, registry.clone());
        interval.add_packet(&Packet::new(t0(), UnitSystem::Us).with("outTemp", Some(41.0)));
        interval.finalize()
    };

    {
        let storage = Arc::new(Storage::new(&db_url(&temp_dir)).await?);
        let coordinator = MergeCoordinator::new(storage, registry.clone());
        assert_eq!(coordinator.merge(&finalized()?).await?, MergeOutcome::Merged(1));
    }

    // 重新打开同一个数据库
    let storage = Arc::new(Storage::new(&db_url(&temp_dir)).await?);
    let coordinator = MergeCoordinator::new(storage.clone(), registry.clone());
    assert_eq!(coordinator.merge(&finalized()?).await?, MergeOutcome::Skipped);

    let agg = storage
        .aggregate("outTemp", &TimeSpan::day_containing(t0()))
        .await?
        .expect("聚合应已存在");
    assert_eq!(agg.count, 1);
    assert_eq!(agg.unit_system, Some(UnitSystem::Us));
    Ok(())
}

#[tokio::test]
async fn test_engine_with_sqlite() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = Config::default();
    config.database.url = db_url(&temp_dir);

    let engine = Engine::new(config).await?;
    assert!(engine.registry().contains("wind"));

    let (handle, dispatch_loop) = engine.dispatcher();
    handle.shutdown().await?;
    dispatch_loop.run().await?;
    Ok(())
}
