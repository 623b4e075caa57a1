//! Detector backends.
//!
//! The object detector is an external collaborator reached through the
//! [`DetectorBackend`] trait. Backends:
//! - `stub`: replays scripted detections (tests, bench runs without a model)
//! - `tract`: ONNX YOLO model (feature: backend-tract)

mod backend;
pub mod backends;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::{build_backend, StubBackend};
pub use result::{BoundingBox, Detection};
