//! pcm-play - Raw PCM player driven like a game loop
//!
//! Streams a headerless signed 16-bit little-endian PCM file through a
//! [`StreamManager`], one tick's worth of audio per tick. Useful for watching
//! the backpressure policies react when the producer outruns the device.
//!
//! # Usage
//!
//! ```bash
//! pcm-play song.raw
//! pcm-play song.raw --policy clear-then-enqueue --speed 1.5
//! pcm-play song.raw --config stream.toml
//! pcm-play --list-devices
//! pcm-play --threshold 44100 --policy drop-incoming --save-config
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use pcm_queue::device::list_output_devices;
use pcm_queue::{BackpressurePolicy, StreamConfig, StreamManager, config};

/// Longest wait for the device to play out the tail after the last frame
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pcm-play")]
#[command(author, version, about = "Stream raw PCM through a latency-bounded audio queue")]
struct Args {
    /// Raw S16LE PCM file to play
    #[arg(required_unless_present_any = ["list_devices", "save_config"])]
    input: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Stream config file (TOML); defaults to the platform config directory
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save the effective config to the platform config directory and exit
    #[arg(long)]
    save_config: bool,

    // === Overrides ===
    /// Hardware sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Channel count (1 or 2)
    #[arg(long)]
    channels: Option<u8>,

    /// Driver chunk size in sample frames
    #[arg(long)]
    buffer_size: Option<u32>,

    /// Admission ceiling in queued bytes
    #[arg(long)]
    threshold: Option<u32>,

    /// What to do with new frames once the backlog is over the threshold
    #[arg(long, value_enum)]
    policy: Option<BackpressurePolicy>,

    // === Producer pacing ===
    /// Producer ticks per second
    #[arg(long, default_value = "60")]
    tick_rate: u32,

    /// Producer speed relative to real time (above 1.0 overruns the device)
    #[arg(long, default_value = "1.0")]
    speed: f64,
}

impl Args {
    fn stream_config(&self) -> Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => StreamConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => config::load(),
        };

        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(threshold) = self.threshold {
            config.threshold_bytes = threshold;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in list_output_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    if args.save_config {
        let config = args.stream_config()?;
        config::save(&config)?;
        match config::config_dir() {
            Some(dir) => info!("Saved {}", dir.join(config::CONFIG_FILE_NAME).display()),
            None => warn!("No config directory on this platform; nothing saved"),
        }
        return Ok(());
    }

    let Some(input) = args.input.as_ref() else {
        anyhow::bail!("No input file given");
    };
    if args.tick_rate == 0 {
        anyhow::bail!("Tick rate must be greater than 0");
    }
    if !(args.speed > 0.0 && args.speed.is_finite()) {
        anyhow::bail!("Speed must be a positive number");
    }

    let pcm = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let config = args.stream_config()?;

    let mut stream = StreamManager::with_default_output();
    if let Err(e) = stream.initialize(&config) {
        // Keep ticking without audio, like a game would
        warn!("Running without audio: {}", e);
    }

    run(&mut stream, &pcm, &config, args.tick_rate, args.speed);

    if stream.is_active() {
        drain(&stream);
    }

    let totals = stream.metrics().totals();
    info!(
        "Done: submitted={}, admitted={}, dropped={}, clears={}, retries={}, failures={}, bytes={}",
        totals.submitted,
        totals.admitted,
        totals.dropped,
        totals.clears,
        totals.retries,
        totals.failures,
        totals.bytes_admitted
    );

    stream.shutdown();
    Ok(())
}

/// Feed `pcm` one tick at a time until it runs out
fn run(stream: &mut StreamManager, pcm: &[u8], config: &StreamConfig, tick_rate: u32, speed: f64) {
    let tick = Duration::from_secs_f64(1.0 / f64::from(tick_rate));
    // Whole samples per chunk so frames never split a sample
    let sample_bytes = usize::from(config.channels) * 2;
    let per_tick = f64::from(config.bytes_per_second()) / f64::from(tick_rate) * speed;
    let chunk = ((per_tick as usize) / sample_bytes).max(1) * sample_bytes;

    info!(
        "Streaming {} bytes in {}-byte frames at {} ticks/s (speed {:.2}x)",
        pcm.len(),
        chunk,
        tick_rate,
        speed
    );

    let mut next_tick = Instant::now();
    for frame in pcm.chunks(chunk) {
        if let Err(e) = stream.submit(frame) {
            // Not fatal: the next tick gets a fresh attempt
            tracing::debug!("Frame not queued: {}", e);
        }

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            // Fell behind; don't try to catch up with a burst
            next_tick = now;
        }
    }
}

/// Wait for the device to play what is still queued
fn drain(stream: &StreamManager) {
    let started = Instant::now();
    while !is_drained(stream.queued_bytes()) && started.elapsed() < DRAIN_TIMEOUT {
        thread::sleep(Duration::from_millis(10));
    }
}

/// A lone trailing byte is half a sample and never plays
fn is_drained(queued: u32) -> bool {
    queued <= 1
}
