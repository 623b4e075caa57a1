//! Greedy non-maximum suppression.

use crate::detect::BoundingBox;

/// Returns the indices of the boxes kept by greedy NMS, highest score first.
///
/// Candidates are visited in descending score order (ties keep input order).
/// Each visited box is accepted unless it overlaps an already accepted box by
/// an intersection-over-union strictly greater than `overlap_threshold`.
pub fn suppress(boxes: &[BoundingBox], scores: &[f32], overlap_threshold: f32) -> Vec<usize> {
    let len = boxes.len().min(scores.len());
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep: Vec<usize> = Vec::with_capacity(len);
    for idx in order {
        let overlaps = keep
            .iter()
            .any(|&kept| boxes[kept].iou(&boxes[idx]) > overlap_threshold);
        if !overlaps {
            keep.push(idx);
        }
    }
    keep
}
