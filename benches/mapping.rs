//! Benchmarks for mapping construction and rule application
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lutscope::mapping::build_mapping_from_images;
use lutscope::sampling::SCAN_STAGE;
use lutscope::{
    apply_rule, densify, AggregateKind, ImageSet, Mapping, ProcessingRule, RunControl,
    SampleMode, Transform,
};
use ndarray::Array2;

/// Synthetic original with a gamma-like target
fn generate_pair(width: usize, height: usize) -> (Array2<u16>, Array2<u16>) {
    let original = Array2::from_shape_fn((height, width), |(y, x)| {
        ((x * 65535 / width.max(1) + y * 7) % 65536) as u16
    });
    let target = original.mapv(|v| ((v as f64 / 65535.0).powf(0.8) * 65535.0) as u16);
    (original, target)
}

fn bench_build_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_mapping");

    for size in [256usize, 1024, 2048].iter() {
        let (original, target) = generate_pair(*size, *size);
        group.throughput(Throughput::Elements((size * size) as u64));

        for kind in [AggregateKind::Mean, AggregateKind::Median] {
            for parallel in [false, true] {
                let id = format!("{:?}/{}", kind, if parallel { "parallel" } else { "sequential" });
                group.bench_with_input(
                    BenchmarkId::new(id, format!("{}x{}", size, size)),
                    &parallel,
                    |b, &parallel| {
                        let images = ImageSet::new(original.view(), target.view()).unwrap();
                        b.iter(|| {
                            build_mapping_from_images(
                                black_box(&images),
                                SampleMode::Exhaustive,
                                kind,
                                &RunControl::unattended(),
                                parallel,
                                SCAN_STAGE,
                            )
                            .unwrap()
                        });
                    },
                );
            }
        }
    }

    group.finish();
}

fn bench_densify(c: &mut Criterion) {
    let sparse = Mapping::from_pairs((0..65535u32).step_by(97).map(|v| (v as u16, (v / 2) as u16)));

    c.bench_function("densify", |b| b.iter(|| densify(black_box(&sparse)).unwrap()));
}

fn bench_apply_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_rule");
    let (original, _) = generate_pair(1024, 1024);
    let lut = densify(&Mapping::from_pairs([(0, 100), (65535, 60000)])).unwrap();
    group.throughput(Throughput::Elements(1024 * 1024));

    group.bench_function("lut_1024x1024", |b| {
        let mut rule = ProcessingRule::new("lut", Transform::lut(Mapping::default(), lut.clone()));
        b.iter(|| apply_rule(black_box(original.view()), &mut rule, &RunControl::unattended()).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_build_mapping, bench_densify, bench_apply_rule);
criterion_main!(benches);
