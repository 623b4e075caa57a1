#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tally_link::Transport;

/// One step of what the fake peripheral does when the controller reads.
pub enum Event {
    /// Bytes that become readable, possibly over several reads.
    Data(Vec<u8>),
    /// Nothing arrives for the whole read window.
    Stall,
    /// The read fails outright.
    Fail(io::ErrorKind),
}

/// In-memory transport that replays a read script and records writes.
///
/// Once the script is exhausted every read stalls.
#[derive(Default)]
pub struct ScriptedTransport {
    events: VecDeque<Event>,
    pub written: Vec<u8>,
    /// Accept at most this many bytes per write call.
    pub write_chunk: Option<usize>,
    /// Fail every write with this kind.
    pub write_error: Option<io::ErrorKind>,
    /// Fail every write once this many writes have gone through.
    pub fail_write_after: Option<usize>,
    pub writes: usize,
    pub reads: usize,
}

impl ScriptedTransport {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn remaining_events(&self) -> usize {
        self.events.len()
    }

    /// Every `<...>` frame written so far, delimiters stripped.
    pub fn frames(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.written);
        let mut frames = Vec::new();
        let mut rest = text.as_ref();
        while let Some(start) = rest.find('<') {
            let Some(len) = rest[start..].find('>') else {
                break;
            };
            frames.push(rest[start + 1..start + len].to_string());
            rest = &rest[start + len + 1..];
        }
        frames
    }

    /// Number of `CAPTURE\n` commands written so far.
    pub fn captures(&self) -> usize {
        String::from_utf8_lossy(&self.written)
            .matches("CAPTURE\n")
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.reads += 1;
        match self.events.pop_front() {
            Some(Event::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.events.push_front(Event::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(Event::Fail(kind)) => Err(io::Error::new(kind, "scripted read failure")),
            Some(Event::Stall) | None => {
                std::thread::sleep(timeout);
                Err(io::Error::new(io::ErrorKind::TimedOut, "scripted stall"))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(io::Error::new(kind, "scripted write failure"));
        }
        if self.fail_write_after.is_some_and(|limit| self.writes >= limit) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            ));
        }
        self.writes += 1;
        let n = self.write_chunk.map_or(buf.len(), |chunk| chunk.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// `[u32 LE length][payload]` as the peripheral sends an image.
pub fn image_reply(payload: &[u8]) -> Event {
    Event::Data(tally_link::encode_length_prefixed(payload).unwrap())
}
