//! Performance benchmarks for mission transfers

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use missionlink_core::{FailureMode, LinkModel, Loopback, SimVehicle, TransferConfig};
use missionlink_integration_tests::test_mission;

/// Benchmark a full upload over a clean link
fn bench_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload");

    for count in [8u16, 128, 1024] {
        let items = test_mission(count);
        group.throughput(Throughput::Elements(u64::from(count)));

        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| {
                let mut loopback = Loopback::new(TransferConfig::default(), SimVehicle::new()).unwrap();
                loopback.engine.begin_write(items.clone()).unwrap();
                loopback.run();
                black_box(loopback.engine.mission_items().count())
            });
        });
    }

    group.finish();
}

/// Benchmark a full download over a clean link
fn bench_download(c: &mut Criterion) {
    let mut group = c.benchmark_group("download");

    for count in [8u16, 128, 1024] {
        let items = test_mission(count);
        group.throughput(Throughput::Elements(u64::from(count)));

        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| {
                let vehicle = SimVehicle::with_mission(items.clone());
                let mut loopback = Loopback::new(TransferConfig::default(), vehicle).unwrap();
                loopback.engine.begin_read().unwrap();
                loopback.run();
                black_box(loopback.engine.mission_items().count())
            });
        });
    }

    group.finish();
}

/// Benchmark retry overhead on a lossy link
fn bench_lossy_download(c: &mut Criterion) {
    let mut group = c.benchmark_group("lossy_download");
    let items = test_mission(256);
    let config = TransferConfig::default().with_max_retries(16);

    for loss in [0.01, 0.05, 0.2] {
        group.bench_with_input(BenchmarkId::from_parameter(loss), &loss, |b, &loss| {
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                let vehicle = SimVehicle::with_mission(items.clone());
                let mut loopback = Loopback::new(config, vehicle)
                    .unwrap()
                    .with_link(LinkModel::lossy(loss, seed));
                loopback.engine.begin_read().unwrap();
                black_box(loopback.run())
            });
        });
    }

    group.finish();
}

/// Benchmark the abort path of a non-retryable failure
fn bench_error_ack_abort(c: &mut Criterion) {
    let items = test_mission(64);

    c.bench_function("write_error_ack_abort", |b| {
        b.iter(|| {
            let mut vehicle = SimVehicle::new();
            vehicle.set_failure_mode(FailureMode::WriteRequest1ErrorAck, false);
            let mut loopback = Loopback::new(TransferConfig::default(), vehicle).unwrap();
            loopback.engine.begin_write(items.clone()).unwrap();
            loopback.run();
            black_box(loopback.engine.observer().errors().len())
        });
    });
}

criterion_group!(
    benches,
    bench_upload,
    bench_download,
    bench_lossy_download,
    bench_error_ack_abort,
);
criterion_main!(benches);
