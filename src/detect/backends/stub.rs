use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend. Replays a fixed script of detection passes, one per call,
/// wrapping around at the end. The image bytes are ignored.
#[derive(Default)]
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl StubBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Load a script from a JSON file: an array of passes, each an array of
    /// `{"label", "confidence", "box": {"x", "y", "width", "height"}}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stub script {}", path.display()))?;
        let script: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid stub script {}: {}", path.display(), e))?;
        Ok(Self::new(script))
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.cursor
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &[u8]) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            self.cursor += 1;
            return Ok(Vec::new());
        }
        let pass = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::io::Write;

    #[test]
    fn stub_backend_replays_script_cyclically() {
        let person = Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 5.0, 5.0));
        let mut backend = StubBackend::new(vec![vec![person.clone()], vec![]]);

        assert_eq!(backend.detect(b"img").unwrap(), vec![person.clone()]);
        assert!(backend.detect(b"img").unwrap().is_empty());
        assert_eq!(backend.detect(b"img").unwrap(), vec![person]);
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut backend = StubBackend::default();
        assert!(backend.detect(b"").unwrap().is_empty());
    }

    #[test]
    fn loads_script_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"[[{"label": "cup", "confidence": 0.7,
                   "box": {"x": 1, "y": 2, "width": 3, "height": 4}}]]"#,
        )
        .unwrap();
        let mut backend = StubBackend::from_json_file(file.path()).unwrap();
        let pass = backend.detect(b"").unwrap();
        assert_eq!(pass[0].label, "cup");
        assert_eq!(pass[0].bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }
}
