//! Decoding of darknet-style YOLO output rows.
//!
//! Each row is `[cx, cy, w, h, objectness, score_0, score_1, ...]` with box
//! geometry normalized to `0..1`. The class is the argmax of the class scores
//! and that score is the candidate's confidence; objectness is ignored.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::detect::result::{BoundingBox, Detection};

/// Number of leading non-class columns in a row.
pub const ROW_HEADER_LEN: usize = 5;

/// Load class names from a newline-separated file (e.g. `coco.names`).
pub fn load_class_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read class names from {}", path.display()))?;
    let names = parse_class_names(&raw);
    if names.is_empty() {
        return Err(anyhow!("class names file {} is empty", path.display()));
    }
    Ok(names)
}

pub fn parse_class_names(raw: &str) -> Vec<String> {
    raw.trim_end_matches('\n')
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Decode rows into pixel-space candidates above `confidence_threshold`.
///
/// `data` is a flat buffer of rows, each `ROW_HEADER_LEN + class_names.len()`
/// wide. Trailing partial rows are rejected.
pub fn decode_rows(
    data: &[f32],
    class_names: &[String],
    image_width: u32,
    image_height: u32,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    let stride = ROW_HEADER_LEN + class_names.len();
    if class_names.is_empty() {
        return Err(anyhow!("no class names configured"));
    }
    if data.len() % stride != 0 {
        return Err(anyhow!(
            "output length {} is not a multiple of row width {}",
            data.len(),
            stride
        ));
    }

    let wt = image_width as f32;
    let ht = image_height as f32;
    let mut detections = Vec::new();
    for row in data.chunks_exact(stride) {
        let scores = &row[ROW_HEADER_LEN..];
        // `max_by` keeps the last of equal maxima; walk backwards so ties go
        // to the lowest class index.
        let Some((class_id, &confidence)) = scores
            .iter()
            .enumerate()
            .rev()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            continue;
        };
        if confidence <= confidence_threshold {
            continue;
        }
        let w = (row[2] * wt).trunc();
        let h = (row[3] * ht).trunc();
        let x = (row[0] * wt - w / 2.0).trunc();
        let y = (row[1] * ht - h / 2.0).trunc();
        detections.push(Detection::new(
            class_names[class_id].clone(),
            confidence,
            BoundingBox::new(x, y, w, h),
        ));
    }
    Ok(detections)
}
