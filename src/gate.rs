//! Duplicate-send suppression.

use anyhow::anyhow;
use serde::Deserialize;
use std::str::FromStr;

/// When a result frame is worth transmitting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Only when the body differs from the last one sent.
    #[default]
    ChangeOnly,
    /// Every cycle.
    Always,
}

impl FromStr for GatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "change_only" | "change-only" => Ok(Self::ChangeOnly),
            "always" => Ok(Self::Always),
            other => Err(anyhow!(
                "{} is not a supported gate policy. Use either `change_only` or `always`.",
                other
            )),
        }
    }
}

/// Remembers the last transmitted body and suppresses identical repeats.
#[derive(Debug, Default)]
pub struct ChangeGate {
    policy: GatePolicy,
    last_sent: Option<String>,
}

impl ChangeGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            last_sent: None,
        }
    }

    /// Decide and record in one step: returns true and remembers `candidate`
    /// when it should go out.
    pub fn should_send(&mut self, candidate: &str) -> bool {
        let send = self.would_send(candidate);
        if send {
            self.record_sent(candidate);
        }
        send
    }

    /// Decision only; state is untouched.
    pub fn would_send(&self, candidate: &str) -> bool {
        match self.policy {
            GatePolicy::Always => true,
            GatePolicy::ChangeOnly => self.last_sent.as_deref() != Some(candidate),
        }
    }

    /// Remember `candidate` as the last transmitted body.
    pub fn record_sent(&mut self, candidate: &str) {
        self.last_sent = Some(candidate.to_string());
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }
}
