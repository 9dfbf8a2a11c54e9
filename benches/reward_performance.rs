use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drivebench::reward;
use drivebench::telemetry::{TelemetrySnapshot, Vec3};

fn create_sample_snapshot(step: usize) -> TelemetrySnapshot {
    TelemetrySnapshot {
        speed_cmps: Some(1500.0 + step as f64),
        acceleration_cmps2: Some(Vec3::new(300.0, 120.0, 9.8)),
        distance_to_lane_center_cm: Some(80.0),
        distance_along_route_cm: Some(step as f64 * 25.0),
        lap_number: Some(1 + (step / 1000) as u32),
        throttle: Some(0.85),
    }
}

fn bench_reward_terms(c: &mut Criterion) {
    let mut group = c.benchmark_group("reward_terms");

    group.bench_function("speed_reward", |b| {
        b.iter(|| reward::speed_reward(black_box(1800.0), black_box(0.016)));
    });

    group.bench_function("lane_deviation_penalty", |b| {
        b.iter(|| reward::lane_deviation_penalty(black_box(320.0), black_box(Some(0.016))));
    });

    group.bench_function("gforce_penalty", |b| {
        b.iter(|| reward::gforce_penalty(black_box(0.8), black_box(0.016)));
    });

    group.bench_function("progress_reward", |b| {
        b.iter(|| reward::progress_reward(black_box(40.0), black_box(Some(0.016))));
    });

    group.finish();
}

fn bench_step_reward(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_reward");

    group.bench_function("all_terms_single_step", |b| {
        let snapshot = create_sample_snapshot(0);
        b.iter(|| {
            let gforce = snapshot.gforce().unwrap();
            let reward = reward::progress_reward(black_box(40.0), Some(0.016))
                + reward::speed_reward(snapshot.speed_cmps.unwrap(), 0.016)
                - reward::gforce_penalty(gforce, 0.016).unwrap()
                - reward::lane_deviation_penalty(
                    snapshot.distance_to_lane_center_cm.unwrap(),
                    Some(0.016),
                )
                .unwrap();
            black_box(reward)
        });
    });

    group.bench_function("all_terms_1000_steps", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for i in 0..1000 {
                let snapshot = create_sample_snapshot(i);
                let gforce = snapshot.gforce().unwrap();
                total += reward::progress_reward(25.0, Some(0.016))
                    + reward::speed_reward(snapshot.speed_cmps.unwrap(), 0.016)
                    - reward::gforce_penalty(gforce, 0.016).unwrap()
                    - reward::lane_deviation_penalty(
                        snapshot.distance_to_lane_center_cm.unwrap(),
                        Some(0.016),
                    )
                    .unwrap();
            }
            black_box(total)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_reward_terms, bench_step_reward);
criterion_main!(benches);
