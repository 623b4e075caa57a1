//! peripheral_sim - stand-in for the camera/display peripheral
//!
//! Listens on TCP, answers every `CAPTURE` line with the next image from a
//! directory (length-prefixed), and logs each result frame it gets back the
//! way the display would show it. Result frames are optional; the controller
//! may skip or suppress them.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tally_link::channel::TcpTransport;
use tally_link::{
    decode_text_frame, encode_length_prefixed, parse_result_body, ProtocolError,
    ReliableByteChannel, Transport,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3333")]
    listen: String,

    /// Directory of images served in name order, cycling.
    #[arg(long)]
    images: PathBuf,

    /// Drop the controller after this long without traffic.
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let images = load_images(&args.images)?;
    log::info!("serving {} images from {}", images.len(), args.images.display());

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("bind {}", args.listen))?;
    log::info!("peripheral_sim listening on {}", args.listen);

    let idle_timeout = Duration::from_secs(args.idle_timeout_secs);
    let mut served = 0usize;
    for stream in listener.incoming() {
        let stream = stream.context("accept controller connection")?;
        let transport = TcpTransport::from_stream(stream);
        let mut channel = ReliableByteChannel::new(transport, 0);
        log::info!("controller connected: {}", channel.describe());

        loop {
            let message = match next_message(&mut channel, idle_timeout) {
                Ok(message) => message,
                Err(ProtocolError::Timeout { .. }) => {
                    log::info!("controller idle or disconnected");
                    break;
                }
                Err(e) => {
                    log::warn!("dropping connection: {}", e);
                    break;
                }
            };
            match message {
                Message::Command(cmd) if cmd == "CAPTURE" => {
                    let (name, image) = &images[served % images.len()];
                    served += 1;
                    let sent = encode_length_prefixed(image)
                        .and_then(|framed| channel.send_bytes(&framed));
                    if let Err(e) = sent {
                        log::warn!("dropping connection: {}", e);
                        break;
                    }
                    log::info!("sent {} ({} bytes)", name, image.len());
                }
                Message::Command(cmd) => log::warn!("ignoring unknown command {:?}", cmd),
                Message::Result(frame) => match decode_text_frame(&frame) {
                    Ok(body) => show(&body),
                    Err(e) => log::warn!("bad result frame: {}", e),
                },
            }
        }
    }
    Ok(())
}

enum Message {
    /// A `\n`-terminated command line.
    Command(String),
    /// A raw `<...>` frame, delimiters included.
    Result(Vec<u8>),
}

/// Read the next command line or result frame, whichever comes first.
fn next_message<T: Transport>(
    channel: &mut ReliableByteChannel<T>,
    timeout: Duration,
) -> Result<Message, ProtocolError> {
    let first = channel.read_exact(1, timeout)?[0];
    let mut raw = vec![first];
    if first == b'<' {
        while raw.last() != Some(&b'>') {
            raw.push(channel.read_exact(1, timeout)?[0]);
        }
        return Ok(Message::Result(raw));
    }
    while raw.last() != Some(&b'\n') {
        raw.push(channel.read_exact(1, timeout)?[0]);
    }
    let line = String::from_utf8_lossy(&raw);
    Ok(Message::Command(line.trim().to_string()))
}

fn show(body: &str) {
    match parse_result_body(body) {
        Ok(result) => {
            if let Some(missing) = &result.missing {
                if missing.is_empty() {
                    log::info!("display: No missing objects");
                } else {
                    log::info!("display: Missing: {}", missing.join(", "));
                }
            }
            for (label, count) in result.counts.iter() {
                log::info!("display: {} {}", label, count);
            }
        }
        Err(e) => log::warn!("unparseable result body {:?}: {}", body, e),
    }
}

fn load_images(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read image directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        images.push((name, bytes));
    }
    if images.is_empty() {
        return Err(anyhow!("no images found in {}", dir.display()));
    }
    Ok(images)
}
