//! Session controller: the capture → receive → detect → report loop.
//!
//! One controller owns one channel, one detector, one change gate and one
//! baseline comparator. Cycles run strictly one after another. A failed cycle
//! is logged and the loop moves on; gate and baseline state only change after
//! a cycle has produced a snapshot.

use anyhow::anyhow;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::aggregate::{aggregate, CountSnapshot, Thresholds};
use crate::baseline::BaselineComparator;
use crate::channel::{ReliableByteChannel, Transport};
use crate::codec;
use crate::detect::DetectorBackend;
use crate::error::ProtocolError;
use crate::gate::{ChangeGate, GatePolicy};

/// Pause after a failed cycle so a dead link does not spin.
const FAILURE_BACKOFF: Duration = Duration::from_millis(200);

/// What the controller reports back to the peripheral.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Raw counts, filtered by the change gate.
    #[default]
    Simple,
    /// Missing-object report against a baseline, sent every cycle.
    Comparator,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Simple => "simple",
            SessionMode::Comparator => "comparator",
        }
    }
}

impl FromStr for SessionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "comparator" | "compare" => Ok(Self::Comparator),
            other => Err(anyhow!(
                "{} is not a supported mode. Use either `simple` or `comparator`.",
                other
            )),
        }
    }
}

/// Simple-mode handling of a cycle that detected nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySnapshotPolicy {
    /// Send nothing.
    #[default]
    Skip,
    /// Send an empty `<>` frame (still subject to the change gate).
    SendEmpty,
}

impl FromStr for EmptySnapshotPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "send_empty" | "send-empty" => Ok(Self::SendEmpty),
            other => Err(anyhow!(
                "{} is not a supported empty snapshot policy. Use either `skip` or `send_empty`.",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub mode: SessionMode,
    pub gate: GatePolicy,
    pub empty_snapshot: EmptySnapshotPolicy,
    pub thresholds: Thresholds,
    /// Per-read window for the payload header and, separately, its body.
    pub read_timeout: Duration,
    /// Pause between cycles.
    pub cycle_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            gate: GatePolicy::default(),
            empty_snapshot: EmptySnapshotPolicy::default(),
            thresholds: Thresholds::default(),
            read_timeout: Duration::from_secs(10),
            cycle_interval: Duration::ZERO,
        }
    }
}

/// Signals from the host environment, polled between cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    ResetBaseline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleStage {
    Capture,
    Receive,
    Detect,
    Encode,
    Transmit,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Capture => "capture",
            CycleStage::Receive => "receive",
            CycleStage::Detect => "detect",
            CycleStage::Encode => "encode",
            CycleStage::Transmit => "transmit",
        };
        f.write_str(name)
    }
}

/// A cycle failure tagged with the stage it happened in.
#[derive(Debug)]
pub struct CycleError {
    pub stage: CycleStage,
    pub source: anyhow::Error,
}

impl CycleError {
    fn new(stage: CycleStage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// The protocol error behind this failure, when there is one.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        self.source.downcast_ref::<ProtocolError>()
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Result of one successful cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A result frame with this body went out.
    Sent { body: String },
    /// The change gate held back a repeat of the last body.
    Suppressed { body: String },
    /// Nothing detected and the empty snapshot policy says skip.
    SkippedEmpty,
    /// This cycle's snapshot became the comparator baseline; nothing sent.
    BaselineArmed { baseline: CountSnapshot },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub cycles: u64,
    pub cycles_failed: u64,
    pub frames_sent: u64,
    pub frames_suppressed: u64,
}

pub struct SessionController<T: Transport> {
    channel: ReliableByteChannel<T>,
    detector: Box<dyn DetectorBackend>,
    settings: SessionSettings,
    gate: ChangeGate,
    comparator: BaselineComparator,
    stats: SessionStats,
}

impl<T: Transport> SessionController<T> {
    pub fn new(
        channel: ReliableByteChannel<T>,
        detector: Box<dyn DetectorBackend>,
        settings: SessionSettings,
    ) -> Self {
        let gate = ChangeGate::new(settings.gate);
        Self {
            channel,
            detector,
            settings,
            gate,
            comparator: BaselineComparator::new(),
            stats: SessionStats::default(),
        }
    }

    /// Run cycles until a `Stop` signal arrives. Returns the final stats.
    ///
    /// A disconnected control receiver is treated as "no more signals", not
    /// as a stop request.
    pub fn run(&mut self, control: &Receiver<ControlSignal>) -> SessionStats {
        log::info!(
            "session running: mode={} detector={} channel={}",
            self.settings.mode.as_str(),
            self.detector.name(),
            self.channel.describe()
        );
        let mut signals_open = true;
        loop {
            if signals_open {
                match self.poll_control(control) {
                    ControlPoll::Stop => break,
                    ControlPoll::Closed => signals_open = false,
                    ControlPoll::Continue => {}
                }
            }

            self.stats.cycles += 1;
            let started = Instant::now();
            let pause = match self.run_cycle() {
                Ok(outcome) => {
                    self.record(&outcome);
                    log::debug!(
                        "cycle {} done in {}ms: {:?}",
                        self.stats.cycles,
                        started.elapsed().as_millis(),
                        outcome
                    );
                    self.settings.cycle_interval
                }
                Err(err) => {
                    self.stats.cycles_failed += 1;
                    log::warn!("cycle {} failed: {}", self.stats.cycles, err);
                    self.settings.cycle_interval.max(FAILURE_BACKOFF)
                }
            };

            if !pause.is_zero() && signals_open {
                match self.wait_control(control, pause) {
                    ControlPoll::Stop => break,
                    ControlPoll::Closed => signals_open = false,
                    ControlPoll::Continue => {}
                }
            } else if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }

        let (bytes_in, bytes_out) = self.channel.traffic();
        log::info!(
            "session stopped: cycles={} failed={} sent={} suppressed={} bytes_in={} bytes_out={}",
            self.stats.cycles,
            self.stats.cycles_failed,
            self.stats.frames_sent,
            self.stats.frames_suppressed,
            bytes_in,
            bytes_out
        );
        self.stats.clone()
    }

    /// One capture → report cycle.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        self.channel
            .request_capture()
            .map_err(|e| CycleError::new(CycleStage::Capture, e))?;

        let image = self
            .channel
            .read_length_prefixed_payload(self.settings.read_timeout)
            .map_err(|e| CycleError::new(CycleStage::Receive, e))?;
        log::debug!("received {} byte image", image.len());

        let detections = self.detector.detect(&image).map_err(|e| {
            CycleError::new(
                CycleStage::Detect,
                e.context(format!("detector on {} byte image", image.len())),
            )
        })?;
        let snapshot = aggregate(&detections, self.settings.thresholds);
        log::info!(
            "{} candidates -> {} objects [{}]",
            detections.len(),
            snapshot.total(),
            codec::encode_counts_body(&snapshot)
        );

        match self.settings.mode {
            SessionMode::Simple => self.report_counts(snapshot),
            SessionMode::Comparator => self.report_comparison(snapshot),
        }
    }

    fn report_counts(&mut self, snapshot: CountSnapshot) -> Result<CycleOutcome, CycleError> {
        if snapshot.is_empty() && self.settings.empty_snapshot == EmptySnapshotPolicy::Skip {
            log::info!("no objects detected; nothing sent");
            return Ok(CycleOutcome::SkippedEmpty);
        }
        let body = codec::encode_counts_body(&snapshot);
        if !self.gate.would_send(&body) {
            log::debug!("result unchanged since last send; suppressed");
            return Ok(CycleOutcome::Suppressed { body });
        }
        self.transmit(&body)?;
        self.gate.record_sent(&body);
        Ok(CycleOutcome::Sent { body })
    }

    fn report_comparison(&mut self, snapshot: CountSnapshot) -> Result<CycleOutcome, CycleError> {
        let result = self.comparator.compare(snapshot);
        if result.baseline_established {
            return Ok(CycleOutcome::BaselineArmed {
                baseline: result.current,
            });
        }
        if self.comparator.baseline().is_none() {
            log::info!("no baseline yet and nothing detected; nothing sent");
            return Ok(CycleOutcome::SkippedEmpty);
        }
        if !result.missing.is_empty() {
            log::warn!("missing from baseline: {}", result.missing.join(","));
        }
        let body = codec::encode_comparison_body(&result);
        self.transmit(&body)?;
        Ok(CycleOutcome::Sent { body })
    }

    fn transmit(&mut self, body: &str) -> Result<(), CycleError> {
        let frame =
            codec::encode_text_frame(body).map_err(|e| CycleError::new(CycleStage::Encode, e))?;
        self.channel
            .send_bytes(&frame)
            .map_err(|e| CycleError::new(CycleStage::Transmit, e))?;
        log::info!("sent <{}>", body);
        Ok(())
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Sent { .. } => self.stats.frames_sent += 1,
            CycleOutcome::Suppressed { .. } => self.stats.frames_suppressed += 1,
            CycleOutcome::SkippedEmpty | CycleOutcome::BaselineArmed { .. } => {}
        }
    }

    /// Apply every pending signal without blocking.
    fn poll_control(&mut self, control: &Receiver<ControlSignal>) -> ControlPoll {
        loop {
            match control.try_recv() {
                Ok(signal) => {
                    if self.apply(signal) {
                        return ControlPoll::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return ControlPoll::Continue,
                Err(TryRecvError::Disconnected) => return ControlPoll::Closed,
            }
        }
    }

    /// Sleep for `pause`, waking early for signals.
    fn wait_control(&mut self, control: &Receiver<ControlSignal>, pause: Duration) -> ControlPoll {
        let deadline = Instant::now() + pause;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ControlPoll::Continue;
            }
            match control.recv_timeout(remaining) {
                Ok(signal) => {
                    if self.apply(signal) {
                        return ControlPoll::Stop;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return ControlPoll::Continue,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(remaining);
                    return ControlPoll::Closed;
                }
            }
        }
    }

    /// Returns true for `Stop`.
    fn apply(&mut self, signal: ControlSignal) -> bool {
        match signal {
            ControlSignal::Stop => {
                log::info!("stop requested");
                true
            }
            ControlSignal::ResetBaseline => {
                if self.settings.mode == SessionMode::Comparator {
                    self.reset_baseline();
                } else {
                    log::info!("baseline reset ignored in simple mode");
                }
                false
            }
        }
    }

    pub fn reset_baseline(&mut self) {
        self.comparator.reset();
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn gate(&self) -> &ChangeGate {
        &self.gate
    }

    pub fn comparator(&self) -> &BaselineComparator {
        &self.comparator
    }

    pub fn channel_mut(&mut self) -> &mut ReliableByteChannel<T> {
        &mut self.channel
    }
}

enum ControlPoll {
    Continue,
    Stop,
    Closed,
}
