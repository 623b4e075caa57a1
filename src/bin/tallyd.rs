//! tallyd - controller daemon for a camera/display peripheral
//!
//! This daemon:
//! 1. Opens the byte channel to the peripheral (serial device or TCP)
//! 2. Requests an image, receives it as a length-prefixed payload
//! 3. Runs the configured detector and counts objects per label
//! 4. Sends the counts (simple mode) or a missing-object report
//!    (comparator mode) back as a `<...>` text frame
//!
//! Ctrl-C stops the loop. On stdin, `q` quits and `r` resets the baseline.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};

use tally_link::detect::build_backend;
use tally_link::{
    open_transport, ControlSignal, ReliableByteChannel, SessionController, SessionMode,
    TallydConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Request images from a camera peripheral and report object counts back to it"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Channel URL, e.g. serial:///dev/ttyUSB0?baud=115200 or tcp://10.0.0.7:3333.
    #[arg(long)]
    channel: Option<String>,

    /// Reporting mode: simple or comparator.
    #[arg(long)]
    mode: Option<SessionMode>,

    /// Ignore stdin; only Ctrl-C stops the daemon.
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TallydConfig::load_from(args.config.as_deref())?;
    if let Some(channel) = args.channel {
        cfg.override_channel(channel);
    }
    if let Some(mode) = args.mode {
        cfg.override_mode(mode);
    }

    let mut detector = build_backend(&cfg.detector)?;
    detector.warm_up().context("detector warm-up")?;
    log::info!(
        "detector={} confidence>{} overlap<={}",
        detector.name(),
        cfg.detector.confidence_threshold,
        cfg.detector.overlap_threshold
    );

    let transport = open_transport(&cfg.channel)
        .with_context(|| format!("failed to acquire channel {}", cfg.channel.url))?;
    let channel = ReliableByteChannel::new(transport, cfg.channel.max_payload_bytes);

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ControlSignal::Stop);
    })
    .context("error setting Ctrl-C handler")?;
    if !args.no_stdin {
        spawn_stdin_control(tx);
        log::info!("type 'q' + Enter to quit, 'r' + Enter to reset the baseline");
    }

    let mut session = SessionController::new(channel, detector, cfg.session.clone());
    session.run(&rx);
    Ok(())
}

fn spawn_stdin_control(tx: Sender<ControlSignal>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let signal = match line.trim() {
                "q" | "quit" => ControlSignal::Stop,
                "r" | "reset" => ControlSignal::ResetBaseline,
                "" => continue,
                other => {
                    log::warn!("unknown command '{}' (use q or r)", other);
                    continue;
                }
            };
            if tx.send(signal).is_err() {
                break;
            }
        }
    });
}
