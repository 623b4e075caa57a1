//! Baseline comparison: which reference objects are no longer in view.

use crate::aggregate::CountSnapshot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComparatorState {
    Uninitialized,
    Armed(CountSnapshot),
}

/// Outcome of one comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComparisonResult {
    /// Baseline labels whose current count fell below the baseline count, in
    /// baseline order. Labels only; no deficit sizes.
    pub missing: Vec<String>,
    pub current: CountSnapshot,
    /// True when this comparison stored `current` as the new baseline.
    pub baseline_established: bool,
}

/// Holds a reference snapshot and reports deficits against it.
///
/// The first non-empty snapshot after construction or [`reset`](Self::reset)
/// becomes the baseline. Objects that appear without being in the baseline
/// are never reported.
#[derive(Debug)]
pub struct BaselineComparator {
    state: ComparatorState,
}

impl BaselineComparator {
    pub fn new() -> Self {
        Self {
            state: ComparatorState::Uninitialized,
        }
    }

    pub fn compare(&mut self, current: CountSnapshot) -> ComparisonResult {
        let ComparatorState::Armed(baseline) = &self.state else {
            return self.arm(current);
        };

        let missing = baseline
            .iter()
            .filter(|(label, base_count)| current.count_or_zero(label) < *base_count)
            .map(|(label, _)| label.to_string())
            .collect();
        ComparisonResult {
            missing,
            current,
            baseline_established: false,
        }
    }

    fn arm(&mut self, current: CountSnapshot) -> ComparisonResult {
        let armed = !current.is_empty();
        if armed {
            log::info!("baseline stored: {:?}", current);
            self.state = ComparatorState::Armed(current.clone());
        }
        ComparisonResult {
            missing: Vec::new(),
            current,
            baseline_established: armed,
        }
    }

    /// Drop the baseline; the next non-empty snapshot becomes the reference.
    pub fn reset(&mut self) {
        if matches!(self.state, ComparatorState::Armed(_)) {
            log::info!("baseline cleared; next capture becomes the reference");
        }
        self.state = ComparatorState::Uninitialized;
    }

    pub fn baseline(&self) -> Option<&CountSnapshot> {
        match &self.state {
            ComparatorState::Armed(baseline) => Some(baseline),
            ComparatorState::Uninitialized => None,
        }
    }

    pub fn state(&self) -> &ComparatorState {
        &self.state
    }
}

impl Default for BaselineComparator {
    fn default() -> Self {
        Self::new()
    }
}
