//! tally-link
//!
//! Controller side of a camera/display peripheral link. The controller asks
//! the peripheral for a still image, receives it as a length-prefixed payload
//! over a serial line or socket, counts the objects an external detector finds
//! in it, and sends a short `<...>` text frame back for the peripheral to show.
//!
//! # Module Structure
//!
//! - `codec`: length-prefixed payloads, `<...>` text frames, result bodies
//! - `channel`: timeout-bounded transports and the reliable read/write layer
//! - `detect`: detector backend trait and backends (stub, tract)
//! - `aggregate` / `nms`: confidence filter, overlap suppression, per-label counts
//! - `gate`: duplicate-send suppression
//! - `baseline`: missing-object comparison against a reference snapshot
//! - `session`: the capture → receive → detect → report loop
//! - `config`: file + environment configuration for `tallyd`

pub mod aggregate;
pub mod baseline;
pub mod channel;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod gate;
pub mod nms;
pub mod session;

pub use aggregate::{aggregate, CountSnapshot, Thresholds};
pub use baseline::{BaselineComparator, ComparatorState, ComparisonResult};
pub use channel::{open_transport, ReliableByteChannel, Transport};
pub use codec::{
    decode_length_prefix, decode_text_frame, encode_comparison_body, encode_counts_body,
    encode_length_prefixed, encode_text_frame, parse_result_body, ResultBody,
};
pub use config::{ChannelSettings, DetectorSettings, TallydConfig};
pub use detect::{BoundingBox, Detection, DetectorBackend, StubBackend};
pub use error::ProtocolError;
pub use gate::{ChangeGate, GatePolicy};
pub use session::{
    ControlSignal, CycleError, CycleOutcome, CycleStage, EmptySnapshotPolicy, SessionController,
    SessionMode, SessionSettings, SessionStats,
};
