use anyhow::Result;
use clap::{Parser, ValueEnum};
use env_logger::Target;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtc_adaptive::{
    BitrateConfig, BitrateController, BitrateStrategy, GradeConfig, GradeStrategy, Ladder,
    LinearConfig, LinearStrategy, LinearTrackConfig, LinearTrackStrategy, MediaKind, MediaTracks,
    NetworkReport, Track, TrackSelector, TrackSelectorConfig,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Packets per second sent by the simulated encoder at 1 Mbps.
const PACKETS_PER_MBPS: f64 = 90.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Linear,
    Grade,
}

#[derive(Parser)]
#[command(name = "link-simulator")]
#[command(author = "Rain Liu <yliu@webrtc.rs>")]
#[command(version = "0.1.0")]
#[command(about = "Drives the ABR and MBR controllers over a synthetic congested link.")]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!(""))]
    output_log_file: String,
    /// Congestion algorithm of the sender.
    #[arg(short, long, value_enum, default_value_t = Strategy::Linear)]
    strategy: Strategy,
    /// Simulated duration, in seconds.
    #[arg(long, default_value_t = 120)]
    duration: u64,
    /// Statistics polling interval, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval: u64,
    /// Initial link capacity, in bits per second.
    #[arg(long, default_value_t = 2_500_000)]
    capacity: u64,
    /// Pass the link capacity to the sender as a constraint.
    #[arg(long)]
    constrained: bool,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// JSON file overriding the controllers configuration.
    #[arg(short, long)]
    config: Option<String>,
}

/// Controllers configuration, every section optional.
#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatorConfig {
    bitrate: BitrateConfig,
    linear: LinearConfig,
    grade: GradeConfig,
    selector: TrackSelectorConfig,
    track: LinearTrackConfig,
}

/// Link whose capacity drifts randomly and collapses from time to time.
struct Link {
    rng: StdRng,
    nominal: u64,
    capacity: u64,
}

impl Link {
    fn new(seed: u64, capacity: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            nominal: capacity,
            capacity,
        }
    }

    fn tick(&mut self) {
        if self.rng.random_bool(0.03) {
            // sudden drop, e.g. a competing flow
            self.capacity /= 3;
        } else {
            let drift = self.rng.random_range(-0.08..0.12);
            let capacity = self.capacity as f64 * (1.0 + drift);
            self.capacity = capacity.clamp(100_000.0, self.nominal as f64 * 1.5) as u64;
        }
    }

    /// Loss percentage when pushing `bitrate` through the link.
    fn loss(&mut self, bitrate: u64) -> f64 {
        let overflow = bitrate.saturating_sub(self.capacity) as f64 / bitrate.max(1) as f64;
        let noise = if self.rng.random_bool(0.1) {
            self.rng.random_range(0.0..1.5)
        } else {
            0.0
        };
        overflow * 100.0 + noise
    }
}

/// Cumulative receiver side counters of one rendition.
#[derive(Default)]
struct Receiver {
    packets_lost: u64,
    nack_count: u64,
    key_frames_decoded: u64,
}

impl Receiver {
    fn receive(
        &mut self,
        track: &Track,
        loss: f64,
        elapsed: Duration,
        gop: Duration,
    ) -> NetworkReport {
        let packets = track.max_bitrate as f64 / 1_000_000.0 * PACKETS_PER_MBPS;
        let lost = (packets * loss / 100.0).round() as u64;
        self.packets_lost += lost;
        self.nack_count += lost.div_ceil(4);
        if track.kind == MediaKind::Video && elapsed.as_millis() % gop.as_millis().max(1) < 1000 {
            self.key_frames_decoded += 1;
        }

        NetworkReport::default()
            .with_loss_perc(loss)
            .with_packets_lost(self.packets_lost)
            .with_nack_count(self.nack_count)
            .with_key_frames_decoded(self.key_frames_decoded)
    }
}

fn ladder() -> Result<Ladder> {
    Ok(Ladder::new(vec![
        Track::new(0, MediaKind::Video, "H264", 3_000_000),
        Track::new(1, MediaKind::Video, "H264", 1_500_000),
        Track::new(2, MediaKind::Video, "H264", 800_000),
        Track::new(3, MediaKind::Video, "H264", 300_000),
        Track::new(4, MediaKind::Audio, "opus", 128_000),
        Track::new(5, MediaKind::Audio, "opus", 32_000),
    ])?)
}

fn load_config(path: Option<&str>) -> Result<SimulatorConfig> {
    match path {
        Some(path) => {
            let config = serde_json::from_reader(BufReader::new(File::open(path)?))?;
            log::info!("loaded {path}: {config:?}");
            Ok(config)
        }
        None => Ok(SimulatorConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output_log_file = cli.output_log_file;
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;

    if cli.debug {
        env_logger::Builder::new()
            .target(if !output_log_file.is_empty() {
                Target::Pipe(Box::new(
                    OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(true)
                        .open(output_log_file)?,
                ))
            } else {
                Target::Stdout
            })
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;
    let strategy: Box<dyn BitrateStrategy> = match cli.strategy {
        Strategy::Linear => Box::new(LinearStrategy::new(config.linear)),
        Strategy::Grade => Box::new(GradeStrategy::new(config.grade)),
    };
    let mut abr = BitrateController::new(config.bitrate, strategy);
    let mut mbr = TrackSelector::new(config.selector, LinearTrackStrategy::new(config.track));

    let ladder = ladder()?;
    let mut selected = MediaTracks {
        audio: ladder.top(MediaKind::Audio).map(|track| track.index),
        video: ladder.top(MediaKind::Video).map(|track| track.index),
        data: None,
    };
    let mut receivers: HashMap<u32, Receiver> = HashMap::new();
    let mut link = Link::new(cli.seed, cli.capacity);

    let interval = Duration::from_millis(cli.interval.max(1));
    let gop = Duration::from_secs(2);
    let start = Instant::now();
    let mut bitrate = None;
    let mut switches = 0;

    println!(
        "{:>8} {:>10} {:>10} {:>7} {:>6} {:>6}",
        "time", "capacity", "bitrate", "loss", "video", "audio"
    );

    let mut elapsed = Duration::ZERO;
    while elapsed <= Duration::from_secs(cli.duration) {
        let now = start + elapsed;
        link.tick();

        // sender
        let sent = bitrate.unwrap_or(abr.startup());
        let loss = link.loss(sent);
        let report = NetworkReport::default().with_loss_perc(loss);
        let constraint = cli.constrained.then_some(link.capacity);
        bitrate = Some(abr.compute(bitrate, constraint, Some(&report), now));

        // receiver
        let mut stats = HashMap::new();
        for index in [selected.video, selected.audio].into_iter().flatten() {
            if let Some(track) = ladder.get(index) {
                let loss = link.loss(track.max_bitrate);
                let receiver = receivers.entry(index).or_default();
                stats.insert(index, receiver.receive(track, loss, elapsed, gop));
            }
        }
        if mbr.compute(&ladder, &mut selected, &stats, now) {
            switches += 1;
        }

        println!(
            "{:>7.1}s {:>10} {:>10} {:>6.1}% {:>6} {:>6}",
            elapsed.as_secs_f64(),
            link.capacity,
            bitrate.unwrap_or_default(),
            loss,
            selected.video.map_or("-".to_owned(), |i| i.to_string()),
            selected.audio.map_or("-".to_owned(), |i| i.to_string()),
        );

        elapsed += interval;
    }

    println!(
        "done: {switches} rendition switches, final up delay {:?}",
        mbr.up_delay()
    );

    Ok(())
}
