use criterion::{Criterion, criterion_group, criterion_main};
use rtc_adaptive::{
    BitrateConfig, BitrateController, GradeStrategy, Ladder, LinearStrategy, MediaKind,
    MediaTracks, NetworkReport, SampleWindow, Track, TrackSelector,
};
use std::collections::HashMap;
use std::hint::black_box;
use std::time::{Duration, Instant};

fn benchmark_sample_window(c: &mut Criterion) {
    let mut window = SampleWindow::new(64);
    let mut value = 0.0;

    c.bench_function("SampleWindow push+stats", |b| {
        b.iter(|| {
            value = (value + 7.3) % 100.0;
            window.push(black_box(value));
            black_box((window.minimum(), window.maximum(), window.average()));
        })
    });
}

fn benchmark_abr(c: &mut Criterion) {
    let reports = [0.0, 0.0, 2.5, 5.0, 0.0, 12.0, 0.0, 0.0]
        .map(|loss| NetworkReport::default().with_loss_perc(loss));
    let start = Instant::now();

    let mut linear = BitrateController::new(BitrateConfig::default(), LinearStrategy::default());
    let mut tick = 0u64;
    let mut bitrate = None;
    c.bench_function("BitrateController<LinearStrategy> compute", |b| {
        b.iter(|| {
            tick += 1;
            let report = &reports[tick as usize % reports.len()];
            bitrate = Some(linear.compute(
                bitrate,
                None,
                Some(black_box(report)),
                start + Duration::from_secs(tick),
            ));
        })
    });

    let mut grade = BitrateController::new(BitrateConfig::default(), GradeStrategy::default());
    let mut tick = 0u64;
    let mut bitrate = None;
    c.bench_function("BitrateController<GradeStrategy> compute", |b| {
        b.iter(|| {
            tick += 1;
            let report = &reports[tick as usize % reports.len()];
            let constraint = (tick % 5 == 0).then_some(1_500_000);
            bitrate = Some(grade.compute(
                bitrate,
                constraint,
                Some(black_box(report)),
                start + Duration::from_secs(tick),
            ));
        })
    });
}

fn benchmark_mbr(c: &mut Criterion) {
    let ladder = Ladder::new(
        (0..8)
            .map(|i| Track::new(i, MediaKind::Video, "H264", 250_000 * u64::from(i + 1)))
            .chain((8..11).map(|i| Track::new(i, MediaKind::Audio, "opus", 32_000 * u64::from(i))))
            .collect(),
    )
    .unwrap();
    let start = Instant::now();

    let mut mbr: TrackSelector = TrackSelector::default();
    let mut selected = MediaTracks {
        audio: Some(10),
        video: Some(7),
        data: None,
    };
    let mut tick = 0u64;
    c.bench_function("TrackSelector compute", |b| {
        b.iter(|| {
            tick += 1;
            let report = NetworkReport::default()
                .with_packets_lost(tick / 3)
                .with_nack_count(tick / 3)
                .with_key_frames_decoded(tick / 2);
            let stats: HashMap<u32, NetworkReport> = [selected.video, selected.audio]
                .into_iter()
                .flatten()
                .map(|index| (index, report.clone()))
                .collect();
            black_box(mbr.compute(
                &ladder,
                &mut selected,
                &stats,
                start + Duration::from_millis(tick * 500),
            ));
        })
    });
}

criterion_group!(benches, benchmark_sample_window, benchmark_abr, benchmark_mbr);
criterion_main!(benches);
