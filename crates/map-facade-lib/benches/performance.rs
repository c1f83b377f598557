//! Performance benchmarks for map-facade-lib
//!
//! Run with: cargo bench --package map-facade-lib

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use map_facade_lib::coords::{bounding_box, path_distance};
use map_facade_lib::export::export_track;
use map_facade_lib::{
    ExportFormat, GeoPoint, TrackPoint, TrackRecorder, TrackedRoute, TrackingConfig,
    UnifiedMarker, diff_markers,
};
use std::collections::HashMap;
use time::macros::datetime;

/// Generate a wiggly track with the specified number of points.
fn generate_points(num_points: usize, base_lat: f64, base_lon: f64) -> Vec<TrackPoint> {
    (0..num_points)
        .map(|i| {
            let t = i as f64 / num_points as f64;
            let lat = base_lat + t * 0.1 + (t * 50.0).sin() * 0.001;
            let lon = base_lon + t * 0.1 + (t * 30.0).cos() * 0.001;
            TrackPoint::new(lat, lon, Some(5.0 + (i % 20) as f64))
        })
        .collect()
}

fn generate_track(num_points: usize) -> TrackedRoute {
    TrackedRoute::from_points(
        "bench",
        generate_points(num_points, 55.70, 37.60),
        datetime!(2024-05-01 10:00:00 UTC),
        datetime!(2024-05-01 12:00:00 UTC),
    )
}

fn generate_markers(count: usize, offset: usize) -> Vec<UnifiedMarker> {
    (0..count)
        .map(|i| {
            let n = i + offset;
            UnifiedMarker::new(
                format!("m{n}"),
                GeoPoint::new(55.0 + (n % 100) as f64 * 0.01, 37.0 + (n / 100) as f64 * 0.01),
            )
        })
        .collect()
}

// ============================================================================
// Geometry
// ============================================================================

fn bench_geometry(c: &mut Criterion) {
    let mut group = c.benchmark_group("geometry");

    let positions: Vec<GeoPoint> = generate_points(50_000, 55.70, 37.60)
        .iter()
        .map(TrackPoint::position)
        .collect();
    group.throughput(Throughput::Elements(positions.len() as u64));

    group.bench_function("path_distance_50k", |b| {
        b.iter(|| path_distance(&positions));
    });

    group.bench_function("bounding_box_50k", |b| {
        b.iter(|| bounding_box(positions.iter().copied()));
    });

    group.finish();
}

// ============================================================================
// Recording
// ============================================================================

fn bench_recorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("recorder");

    let samples = generate_points(10_000, 55.70, 37.60);
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("filter_10k_samples", |b| {
        b.iter(|| {
            let mut recorder = TrackRecorder::new(TrackingConfig::default());
            for p in &samples {
                recorder.push(p.lat, p.lon, p.accuracy);
            }
            recorder.distance()
        });
    });

    group.bench_function("finalize_10k", |b| {
        b.iter(|| generate_track(10_000));
    });

    group.finish();
}

// ============================================================================
// Export
// ============================================================================

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    group.sample_size(20);

    let track = generate_track(10_000);
    for format in ExportFormat::ALL {
        group.bench_with_input(BenchmarkId::new("10k_points", format), &format, |b, f| {
            b.iter(|| export_track(&track, *f));
        });
    }

    group.finish();
}

// ============================================================================
// Markers
// ============================================================================

fn bench_marker_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("markers");

    // Half of the set is shared between both sides
    let rendered: HashMap<String, UnifiedMarker> = generate_markers(2_000, 0)
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();
    let desired = generate_markers(2_000, 1_000);
    group.bench_function("diff_2k", |b| {
        b.iter(|| diff_markers(&rendered, &desired));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_geometry,
    bench_recorder,
    bench_export,
    bench_marker_diff,
);

criterion_main!(benches);
