//! Wire-level error taxonomy.
//!
//! Every failure the framing layer can produce is a `ProtocolError`. Detector
//! failures are opaque (`anyhow::Error`) and are attached to a cycle stage by
//! the session controller instead.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ProtocolError {
    /// Length header shorter than 4 bytes.
    MalformedHeader { got: usize },
    /// Text frame without matching `<` / `>` delimiters.
    MalformedFrame { reason: &'static str },
    /// Outbound body contains a frame delimiter.
    InvalidFrameBody { body: String },
    /// No (or not enough) data before the read deadline or end of stream.
    Timeout { wanted: usize, received: usize },
    /// Declared payload length was never fully received.
    IncompleteTransfer { declared: usize, received: usize },
    /// Declared payload length exceeds the configured ceiling.
    OversizedPayload { declared: usize, limit: usize },
    ChannelWrite {
        written: usize,
        total: usize,
        source: io::Error,
    },
    ChannelRead { source: io::Error },
}

impl ProtocolError {
    /// Stable identifier used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::MalformedHeader { .. } => "MALFORMED_HEADER",
            ProtocolError::MalformedFrame { .. } => "MALFORMED_FRAME",
            ProtocolError::InvalidFrameBody { .. } => "INVALID_FRAME_BODY",
            ProtocolError::Timeout { .. } => "TIMEOUT",
            ProtocolError::IncompleteTransfer { .. } => "INCOMPLETE_TRANSFER",
            ProtocolError::OversizedPayload { .. } => "OVERSIZED_PAYLOAD",
            ProtocolError::ChannelWrite { .. } => "CHANNEL_WRITE",
            ProtocolError::ChannelRead { .. } => "CHANNEL_READ",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedHeader { got } => {
                write!(f, "{}: length header needs 4 bytes, got {}", self.code(), got)
            }
            ProtocolError::MalformedFrame { reason } => write!(f, "{}: {}", self.code(), reason),
            ProtocolError::InvalidFrameBody { body } => write!(
                f,
                "{}: body {:?} contains a frame delimiter",
                self.code(),
                body
            ),
            ProtocolError::Timeout { wanted, received } => write!(
                f,
                "{}: received {} of {} bytes before deadline",
                self.code(),
                received,
                wanted
            ),
            ProtocolError::IncompleteTransfer { declared, received } => write!(
                f,
                "{}: payload declared {} bytes, received {}",
                self.code(),
                declared,
                received
            ),
            ProtocolError::OversizedPayload { declared, limit } => write!(
                f,
                "{}: payload declared {} bytes, limit is {}",
                self.code(),
                declared,
                limit
            ),
            ProtocolError::ChannelWrite {
                written,
                total,
                source,
            } => write!(
                f,
                "{}: wrote {} of {} bytes: {}",
                self.code(),
                written,
                total,
                source
            ),
            ProtocolError::ChannelRead { source } => write!(f, "{}: {}", self.code(), source),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::ChannelWrite { source, .. } | ProtocolError::ChannelRead { source } => {
                Some(source)
            }
            _ => None,
        }
    }
}
