//! Detection aggregation: raw candidates in, per-label counts out.

use crate::detect::{BoundingBox, Detection};
use crate::nms;

/// Ordered label → count mapping produced by one detection pass.
///
/// Labels keep first-seen order. Counts are always at least one; a label with
/// no occurrences is simply absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountSnapshot {
    entries: Vec<(String, u32)>,
}

impl CountSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from `(label, count)` pairs.
    ///
    /// Zero counts are dropped and repeated labels are summed into the first
    /// occurrence.
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut snapshot = Self::new();
        for (label, count) in counts {
            if count > 0 {
                snapshot.add(label.into(), count);
            }
        }
        snapshot
    }

    fn add(&mut self, label: String, count: u32) {
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some((_, existing)) => *existing = existing.saturating_add(count),
            None => self.entries.push((label, count)),
        }
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
    }

    /// Count for `label`, treating an absent label as zero.
    pub fn count_or_zero(&self, label: &str) -> u32 {
        self.get(label).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of objects across all labels.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| u64::from(*c)).sum()
    }
}

impl<'a> FromIterator<&'a str> for CountSnapshot {
    fn from_iter<I: IntoIterator<Item = &'a str>>(labels: I) -> Self {
        let mut snapshot = Self::new();
        for label in labels {
            snapshot.add(label.to_string(), 1);
        }
        snapshot
    }
}

/// Thresholds applied by [`aggregate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Candidates at or below this confidence are discarded.
    pub confidence: f32,
    /// Maximum IoU allowed between two accepted boxes.
    pub overlap: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.3,
            overlap: 0.3,
        }
    }
}

/// Confidence filter, greedy NMS, then a per-label tally.
///
/// The tally walks the indices NMS returned, in the order it returned them,
/// so the snapshot's label order is highest-confidence-first.
pub fn aggregate(detections: &[Detection], thresholds: Thresholds) -> CountSnapshot {
    let survivors: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence > thresholds.confidence)
        .collect();
    if survivors.is_empty() {
        return CountSnapshot::new();
    }

    let boxes: Vec<BoundingBox> = survivors.iter().map(|d| d.bbox).collect();
    let scores: Vec<f32> = survivors.iter().map(|d| d.confidence).collect();
    let accepted = nms::suppress(&boxes, &scores, thresholds.overlap);

    accepted
        .into_iter()
        .map(|idx| survivors[idx].label.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, x: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(x, 0.0, 10.0, 10.0))
    }

    #[test]
    fn empty_input_is_empty_snapshot() {
        for confidence in [0.0, 0.5, 0.99] {
            let t = Thresholds {
                confidence,
                overlap: 0.4,
            };
            assert!(aggregate(&[], t).is_empty());
        }
    }

    #[test]
    fn confidence_filter_is_strict() {
        let detections = [det("cup", 0.5, 0.0), det("cup", 0.51, 100.0)];
        let snapshot = aggregate(
            &detections,
            Thresholds {
                confidence: 0.5,
                overlap: 0.3,
            },
        );
        assert_eq!(snapshot.get("cup"), Some(1));
    }

    #[test]
    fn no_survivors_is_empty_snapshot() {
        let detections = [det("cup", 0.2, 0.0), det("dog", 0.1, 50.0)];
        assert!(aggregate(&detections, Thresholds::default()).is_empty());
    }

    #[test]
    fn overlapping_duplicates_count_once() {
        let detections = [
            det("chair", 0.8, 0.0),
            det("chair", 0.7, 1.0),
            det("chair", 0.9, 200.0),
        ];
        let snapshot = aggregate(&detections, Thresholds::default());
        assert_eq!(snapshot.get("chair"), Some(2));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn suppression_spans_labels() {
        // Overlap suppression works on the whole candidate pool, not per label.
        let detections = [det("cat", 0.9, 0.0), det("dog", 0.6, 0.5)];
        let snapshot = aggregate(&detections, Thresholds::default());
        assert_eq!(snapshot, CountSnapshot::from_counts([("cat", 1)]));
    }

    #[test]
    fn labels_follow_nms_order() {
        let detections = [
            det("bottle", 0.6, 0.0),
            det("person", 0.95, 100.0),
            det("bottle", 0.7, 200.0),
        ];
        let snapshot = aggregate(&detections, Thresholds::default());
        let order: Vec<&str> = snapshot.labels().collect();
        assert_eq!(order, vec!["person", "bottle"]);
        assert_eq!(snapshot.get("bottle"), Some(2));
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn from_counts_drops_zero_and_merges() {
        let snapshot = CountSnapshot::from_counts([("a", 1), ("b", 0), ("a", 2)]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a"), Some(3));
        assert_eq!(snapshot.get("b"), None);
        assert_eq!(snapshot.count_or_zero("b"), 0);
    }
}
