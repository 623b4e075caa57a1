#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::GenericImageView;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo;

/// Tract-based backend for ONNX YOLO inference.
///
/// The model takes a `1x3xSxS` RGB tensor scaled to `0..1` and produces one or
/// more outputs of darknet-style rows (see [`yolo`]). All outputs are decoded
/// and concatenated. Boxes are scaled to the size of the received image, not
/// the model input.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    class_names: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model and its class names from disk.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        labels_path: Q,
        input_size: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            class_names: yolo::load_class_names(labels_path)?,
            input_size,
            confidence_threshold: 0.3,
        })
    }

    /// Override the default pre-filter confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &image::DynamicImage) -> Tensor {
        let side = self.input_size;
        let resized = image
            .resize_exact(side, side, FilterType::Triangle)
            .into_rgb8();
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, encoded: &[u8]) -> Result<Vec<Detection>> {
        let image = image::load_from_memory(encoded).context("decode image payload")?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("decoded image has zero size"));
        }

        let input = self.build_input(&image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let mut detections = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let rows: Vec<f32> = view.iter().copied().collect();
            detections.extend(yolo::decode_rows(
                &rows,
                &self.class_names,
                width,
                height,
                self.confidence_threshold,
            )?);
        }
        Ok(detections)
    }
}
