//! Byte channel to the peripheral.
//!
//! A [`Transport`] is any duplex byte stream that can bound a single read by
//! a timeout. [`ReliableByteChannel`] layers the protocol's reads on top:
//! exact-length accumulation across partial reads, length-prefixed payloads,
//! text frames, and full writes.
//!
//! Transports:
//! - `tcp://host:port` (socket, e.g. a peripheral on WiFi or a serial bridge)
//! - `serial:///dev/ttyUSB0?baud=115200` (character device, linux)

mod serial;
mod tcp;

pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use anyhow::{anyhow, Context, Result};
use std::io;
use std::time::{Duration, Instant};
use url::Url;

use crate::codec::{self, CAPTURE_COMMAND, FRAME_END, FRAME_START, LENGTH_PREFIX_LEN};
use crate::config::ChannelSettings;
use crate::error::ProtocolError;

const READ_CHUNK: usize = 8192;
/// Quiet period that ends a drain of stale input.
const DRAIN_QUIET: Duration = Duration::from_millis(50);
/// Upper bound on bytes dropped by one drain.
const DRAIN_LIMIT: usize = 8 * 1024 * 1024;
/// Upper bound on a text frame body.
const MAX_TEXT_FRAME: usize = 4096;

/// Duplex byte stream with timeout-bounded reads.
pub trait Transport {
    /// Read whatever is available into `buf`, waiting at most `timeout`.
    ///
    /// `Ok(0)` means end of stream. A read that sees no data before the
    /// timeout fails with `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    /// Human-readable endpoint for log lines.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read_timeout(buf, timeout)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Open the transport named by `settings.url`.
///
/// Failure here is fatal for the process; it is not retried.
pub fn open_transport(settings: &ChannelSettings) -> Result<Box<dyn Transport>> {
    let url = Url::parse(&settings.url).context("parse channel url")?;
    match url.scheme() {
        "tcp" => {
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("tcp channel url missing host"))?;
            let port = url
                .port()
                .ok_or_else(|| anyhow!("tcp channel url missing port"))?;
            let transport = TcpTransport::connect(&format!("{}:{}", host, port))?;
            Ok(Box::new(transport))
        }
        "serial" => {
            let baud = url
                .query_pairs()
                .find(|(key, _)| key == "baud")
                .map(|(_, value)| {
                    value
                        .parse::<u32>()
                        .map_err(|_| anyhow!("serial baud '{}' is not an integer", value))
                })
                .transpose()?
                .unwrap_or(settings.baud_rate);
            let transport = SerialTransport::open(url.path(), baud)?;
            if !settings.settle.is_zero() {
                log::info!(
                    "waiting {}ms for peripheral to settle after port open",
                    settings.settle.as_millis()
                );
                std::thread::sleep(settings.settle);
            }
            Ok(Box::new(transport))
        }
        other => Err(anyhow!(
            "unsupported channel scheme '{}'; expected tcp or serial",
            other
        )),
    }
}

/// Protocol reads and writes over a [`Transport`].
pub struct ReliableByteChannel<T: Transport> {
    transport: T,
    max_payload: usize,
    bytes_in: u64,
    bytes_out: u64,
}

impl<T: Transport> ReliableByteChannel<T> {
    pub fn new(transport: T, max_payload: usize) -> Self {
        Self {
            transport,
            max_payload,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Total bytes read and written since construction.
    pub fn traffic(&self) -> (u64, u64) {
        (self.bytes_in, self.bytes_out)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ask the peripheral for one image.
    pub fn request_capture(&mut self) -> Result<(), ProtocolError> {
        self.send_bytes(CAPTURE_COMMAND)?;
        log::debug!("sent CAPTURE to {}", self.transport.describe());
        Ok(())
    }

    /// Collect exactly `n` bytes before `timeout` elapses.
    ///
    /// Partial reads are accumulated. End of stream or the deadline fail with
    /// `Timeout`, and whatever was collected is discarded.
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout {
                    wanted: n,
                    received: filled,
                });
            }
            match self.transport.read_timeout(&mut buf[filled..], remaining) {
                Ok(0) => {
                    return Err(ProtocolError::Timeout {
                        wanted: n,
                        received: filled,
                    })
                }
                Ok(read) => {
                    filled += read;
                    self.bytes_in += read as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(ProtocolError::ChannelRead { source: e }),
            }
        }
        Ok(buf)
    }

    /// Read one `[u32 LE length][payload]` unit.
    ///
    /// Header and body each get their own `timeout` window. After a failure
    /// that left part of a unit unread (a partial header, an oversized
    /// declaration, a short body) stale input is drained so late bytes cannot
    /// be mistaken for the next header.
    pub fn read_length_prefixed_payload(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        let header = match self.read_exact(LENGTH_PREFIX_LEN, timeout) {
            Ok(header) => header,
            Err(ProtocolError::Timeout { wanted, received }) => {
                if received > 0 {
                    self.discard_input();
                }
                return Err(ProtocolError::Timeout { wanted, received });
            }
            Err(err) => return Err(err),
        };
        let declared = codec::decode_length_prefix(&header)? as usize;
        if declared > self.max_payload {
            self.discard_input();
            return Err(ProtocolError::OversizedPayload {
                declared,
                limit: self.max_payload,
            });
        }
        log::info!("receiving {} byte payload", declared);

        match self.read_exact(declared, timeout) {
            Ok(payload) => Ok(payload),
            Err(ProtocolError::Timeout { received, .. }) => {
                self.discard_input();
                Err(ProtocolError::IncompleteTransfer { declared, received })
            }
            Err(e @ ProtocolError::ChannelRead { .. }) => {
                self.discard_input();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Scan for `<`, then collect through `>` and return the decoded body.
    ///
    /// Bytes before the opening delimiter are skipped.
    pub fn read_text_frame(&mut self, timeout: Duration) -> Result<String, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut frame: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout {
                    wanted: frame.len() + 1,
                    received: frame.len(),
                });
            }
            match self.transport.read_timeout(&mut byte, remaining) {
                Ok(0) => {
                    return Err(ProtocolError::Timeout {
                        wanted: frame.len() + 1,
                        received: frame.len(),
                    })
                }
                Ok(_) => {
                    self.bytes_in += 1;
                    let b = byte[0];
                    if frame.is_empty() && b != FRAME_START {
                        continue;
                    }
                    if b == FRAME_START && !frame.is_empty() {
                        // Unterminated frame; restart at the new delimiter.
                        frame.clear();
                    }
                    frame.push(b);
                    if b == FRAME_END {
                        return codec::decode_text_frame(&frame);
                    }
                    if frame.len() > MAX_TEXT_FRAME {
                        return Err(ProtocolError::MalformedFrame {
                            reason: "text frame exceeds maximum length",
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(ProtocolError::ChannelRead { source: e }),
            }
        }
    }

    /// Write all of `payload`, looping over short writes, then flush.
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let total = payload.len();
        let mut written = 0;
        while written < total {
            match self.transport.write(&payload[written..]) {
                Ok(0) => {
                    return Err(ProtocolError::ChannelWrite {
                        written,
                        total,
                        source: io::Error::new(io::ErrorKind::WriteZero, "channel accepted 0 bytes"),
                    })
                }
                Ok(n) => {
                    written += n;
                    self.bytes_out += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ProtocolError::ChannelWrite {
                        written,
                        total,
                        source: e,
                    })
                }
            }
        }
        self.transport
            .flush()
            .map_err(|source| ProtocolError::ChannelWrite {
                written,
                total,
                source,
            })
    }

    /// Drop any input already in flight, until the line is quiet for
    /// `DRAIN_QUIET`. Returns the number of bytes dropped.
    pub fn discard_input(&mut self) -> usize {
        let mut chunk = [0u8; READ_CHUNK];
        let mut dropped = 0;
        while dropped < DRAIN_LIMIT {
            match self.transport.read_timeout(&mut chunk, DRAIN_QUIET) {
                Ok(0) => break,
                Ok(n) => {
                    dropped += n;
                    self.bytes_in += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if dropped > 0 {
            log::debug!("discarded {} stale bytes from {}", dropped, self.describe());
        }
        dropped
    }
}
