use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// A backend owns the whole model path: it decodes the encoded image it is
/// handed, runs inference and returns raw candidates. Candidates are not yet
/// suppressed; overlap suppression and counting happen in
/// [`crate::aggregate`]. Any failure is reported as an opaque error.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one encoded image (JPEG as delivered by the peripheral).
    fn detect(&mut self, image: &[u8]) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
