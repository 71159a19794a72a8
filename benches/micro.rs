//! Micro-benchmarks for the pin-check core.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports. Hardware-facing paths run against the
//! simulated fixture, so the numbers measure the software overhead only.
//!
//! # Running
//!
//! ```bash
//! cargo bench --features sim --bench micro            # run all micro-benchmarks
//! cargo bench --features sim --bench micro -- encode  # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use pincheck::address;
use pincheck::driver::LinkSettings;
use pincheck::gateway::DeviceGateway;
use pincheck::matrix::SwitchMatrix;
use pincheck::plan::{ExecutionPlan, PinCheckCombination};
use pincheck::sim::SimulatedFixture;
use pincheck::{PinCheck, PinCheckConfig};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Handle over a fresh simulated fixture with a 64-pin universe.
///
/// The fixture logs every call; benchmarks reset the logs each iteration
/// so memory stays flat.
fn small_handle() -> (SimulatedFixture, PinCheck) {
    let fixture = SimulatedFixture::new();
    let config = PinCheckConfig {
        pin_count: 64,
        ..PinCheckConfig::default()
    };
    let pc = PinCheck::new(fixture.spi_driver(), fixture.meter(), config).expect("handle");
    (fixture, pc)
}

// ================================================================================================
// Encoder
// ================================================================================================

/// Benchmark group for the address encoder.
///
/// ## `merge/{n}`
///
/// **Scenario:** Merges `n` zap pins spread over the whole universe with a
/// single ground pin.
///
/// **What it measures:** Encoding plus grouping by `(chip_select, register)`.
///
/// **Expected behaviour:** Linear in `n`; sub-microsecond for a 50-pin chunk.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &n in &[1usize, 50, 511] {
        let zap: Vec<u16> = (0..n).map(|i| (i * 511 / n.max(1)) as u16 + 2).collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("merge", n), &zap, |b, zap| {
            b.iter(|| address::merge(black_box(zap), &[1]).unwrap());
        });
    }

    group.finish();
}

// ================================================================================================
// Executor
// ================================================================================================

/// Benchmark group for relay command batches.
///
/// ## `set_matrix_chunk`
///
/// **Scenario:** Routes a 50-pin chunk against one ground pin on an already
/// open session.
///
/// **What it measures:** Gateway locking plus the per-selection transfer
/// sequence.
///
/// ## `clear`
///
/// **Scenario:** The DIO clear pulse followed by eight zero selections.
fn bench_executor(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor");
    let chunk: Vec<u16> = (2..52).collect();

    group.bench_function("set_matrix_chunk", |b| {
        let fixture = SimulatedFixture::new();
        let mut matrix = SwitchMatrix::new(DeviceGateway::new(fixture.spi_driver()), LinkSettings::default()).unwrap();
        matrix.connect().unwrap();
        b.iter(|| {
            matrix.set_matrix(black_box(&chunk), &[1]).unwrap();
            fixture.reset_logs();
        });
    });

    group.bench_function("clear", |b| {
        let fixture = SimulatedFixture::new();
        let mut matrix = SwitchMatrix::new(DeviceGateway::new(fixture.spi_driver()), LinkSettings::default()).unwrap();
        b.iter(|| {
            matrix.clear().unwrap();
            fixture.reset_logs();
        });
    });

    group.finish();
}

// ================================================================================================
// Runs
// ================================================================================================

/// Benchmark group for full runs through the public handle.
///
/// ## `check/batch` and `check/single`
///
/// **Scenario:** 63 test pins against ground pin 1 on an open DUT, with
/// discharge before every measurement.
///
/// **What it measures:** The throughput gain of batch mode. With no
/// failures, batch mode issues two measurements instead of 63.
///
/// **Expected behaviour:** Batch mode is more than an order of magnitude
/// faster.
///
/// ## `check/batch_isolating`
///
/// **Scenario:** Same plan, but one leaking pin per chunk forces fault
/// isolation everywhere.
///
/// **Expected behaviour:** Slightly slower than `single`, since every pin is
/// measured alone after a wasted chunk reading.
///
/// ## `self_test`
///
/// **Scenario:** Full self-test scan of 64 healthy pins.
fn bench_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    let test_pins: Vec<u16> = (2..=64).collect();
    let plan = ExecutionPlan::new(vec![PinCheckCombination::new(test_pins.clone(), [1])]);
    group.throughput(Throughput::Elements(test_pins.len() as u64));

    for (label, batch) in [("batch", true), ("single", false)] {
        group.bench_function(BenchmarkId::new("check", label), |b| {
            let (fixture, pc) = small_handle();
            let plan = plan.clone().batch(batch);
            b.iter(|| {
                pc.run_check(black_box(&plan)).unwrap();
                fixture.reset_logs();
            });
        });
    }

    group.bench_function(BenchmarkId::new("check", "batch_isolating"), |b| {
        let (fixture, pc) = small_handle();
        fixture.connect(2, 1, 50.0);
        fixture.connect(60, 1, 50.0);
        b.iter(|| {
            pc.run_check(black_box(&plan)).unwrap();
            fixture.reset_logs();
        });
    });

    group.bench_function("self_test", |b| {
        let (fixture, pc) = small_handle();
        b.iter(|| {
            pc.run_self_test().unwrap();
            fixture.reset_logs();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_executor, bench_runs);
criterion_main!(benches);
