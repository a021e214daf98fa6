//! 累积器性质测试
//!
//! 用固定种子的随机序列检查统计量之间的关系

use accum_engine::accum::{
    Accumulator, AccumulatorKind, AdderKind, ExtractorKind, IntervalAccumulator, StrategyRegistry,
};
use accum_engine::sample::Sample;
use accum_engine::timespan::TimeSpan;
use accum_engine::units::{Unit, UnitSystem, ValueTuple};
use accum_engine::AccumError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap()
}

fn temp(offset: i64, value: Option<f64>, unit: Unit) -> Sample {
    Sample::scalar(
        "outTemp",
        t0() + Duration::seconds(offset),
        value.map(|v| ValueTuple::some(v, unit)),
        UnitSystem::Metric,
    )
}

fn magnitude(acc: &Accumulator, extractor: ExtractorKind) -> Option<f64> {
    acc.extract(extractor).and_then(|v| v.magnitude())
}

#[test]
fn test_random_sequences_respect_bounds() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let len = rng.gen_range(1..200);
        let values: Vec<f64> = (0..len).map(|_| rng.gen_range(-40.0..45.0)).collect();

        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        for (i, v) in values.iter().enumerate() {
            acc.add(&temp(i as i64, Some(*v), Unit::DegreeC), AdderKind::Add)
                .unwrap();
        }

        let expected = values.iter().sum::<f64>() / values.len() as f64;
        let avg = magnitude(&acc, ExtractorKind::Avg).unwrap();
        let min = magnitude(&acc, ExtractorKind::Min).unwrap();
        let max = magnitude(&acc, ExtractorKind::Max).unwrap();

        assert!((avg - expected).abs() < 1e-9);
        assert!(values.iter().all(|v| min <= *v && *v <= max));
        assert_eq!(acc.count(), values.len() as u64);
    }
}

#[test]
fn test_extract_does_not_mutate() {
    let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
    acc.add(&temp(0, Some(10.0), Unit::DegreeC), AdderKind::Add)
        .unwrap();
    acc.add(&temp(1, None, Unit::DegreeC), AdderKind::Add).unwrap();

    for extractor in [ExtractorKind::Avg, ExtractorKind::Count, ExtractorKind::Last] {
        assert_eq!(acc.extract(extractor), acc.extract(extractor));
    }
    acc.finalize();
    assert_eq!(acc.extract(ExtractorKind::Sum), acc.extract(ExtractorKind::Sum));
    assert_eq!(acc.count(), 1);
}

#[test]
fn test_mixed_units_match_preconverted() {
    let mut rng = StdRng::seed_from_u64(42);
    let celsius: Vec<f64> = (0..30).map(|_| rng.gen_range(-10.0..35.0)).collect();

    let mut mixed = Accumulator::new("outTemp", AccumulatorKind::Scalar);
    let mut uniform = Accumulator::new("outTemp", AccumulatorKind::Scalar);
    for (i, c) in celsius.iter().enumerate() {
        let sample = if i % 2 == 0 {
            temp(i as i64, Some(*c), Unit::DegreeC)
        } else {
            temp(i as i64, Some(c * 1.8 + 32.0), Unit::DegreeF)
        };
        mixed.add(&sample, AdderKind::Add).unwrap();
        uniform
            .add(&temp(i as i64, Some(*c), Unit::DegreeC), AdderKind::Add)
            .unwrap();
    }

    let a = magnitude(&mixed, ExtractorKind::Sum).unwrap();
    let b = magnitude(&uniform, ExtractorKind::Sum).unwrap();
    assert!((a - b).abs() < 1e-9);
}

#[test]
fn test_finalized_accumulator_rejects_add() {
    let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
    acc.add(&temp(0, Some(21.5), Unit::DegreeC), AdderKind::Add)
        .unwrap();
    acc.finalize();

    let before = acc.clone();
    let err = acc
        .add(&temp(1, Some(99.0), Unit::DegreeC), AdderKind::Add)
        .unwrap_err();
    assert!(matches!(err, AccumError::AccumulatorFinalized { .. }));
    assert_eq!(acc.extract(ExtractorKind::Max), before.extract(ExtractorKind::Max));
    assert_eq!(acc.count(), before.count());
}

#[test]
fn test_opposing_wind_cancels_in_record() {
    let span = TimeSpan::new(t0(), t0() + Duration::minutes(5));
    let mut interval = IntervalAccumulator::new(span, Arc::new(StrategyRegistry::with_defaults()));

    for (offset, dir) in [(0, 0.0), (30, 180.0)] {
        let sample = Sample::vector(
            "wind",
            t0() + Duration::seconds(offset),
            Some(ValueTuple::some(10.0, Unit::MilePerHour)),
            Some(ValueTuple::some(dir, Unit::DegreeCompass)),
            UnitSystem::Us,
        );
        interval.add_sample(&sample).unwrap();
    }

    let finalized = interval.finalize().unwrap();
    let record = &finalized.record;
    assert_eq!(record.magnitude("windGust"), Some(10.0));
    assert!(record.magnitude("windSpeed").unwrap().abs() < 1e-9);
    assert_eq!(record.values.get("windDir"), Some(&None));
}

#[test]
fn test_out_of_range_leaves_collection_untouched() {
    let span = TimeSpan::new(t0(), t0() + Duration::minutes(5));
    let mut interval = IntervalAccumulator::new(span, Arc::new(StrategyRegistry::with_defaults()));

    for offset in [-1, 300, 301] {
        let err = interval
            .add_sample(&temp(offset, Some(20.0), Unit::DegreeC))
            .unwrap_err();
        assert!(matches!(err, AccumError::SampleOutOfRange { .. }));
    }
    assert!(interval.is_empty());

    interval
        .add_sample(&temp(299, Some(20.0), Unit::DegreeC))
        .unwrap();
    assert_eq!(interval.len(), 1);
}
