pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;

/// Construct the backend named in the detector settings.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => {
            let backend = match settings.script_path.as_deref() {
                Some(path) => StubBackend::from_json_file(path)?,
                None => StubBackend::default(),
            };
            Ok(Box::new(backend))
        }
        "tract" => build_tract(settings),
        other => Err(anyhow!(
            "unknown detector backend '{}'; expected stub or tract",
            other
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_deref()
        .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
    let labels_path = settings
        .labels_path
        .as_deref()
        .ok_or_else(|| anyhow!("tract backend requires detector.labels_path"))?;
    let backend = TractBackend::new(model_path, labels_path, settings.input_size)?
        .with_threshold(settings.confidence_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
