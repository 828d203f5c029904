use crate::{
    messages::records::detection::ClassificationResult,
    utils::image::{load_resized, to_nhwc},
    PitayaError, Result,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

/// Colour channels the model expects per pixel.
const CHANNELS: usize = 3;

fn default_input_size() -> u32 {
    128
}

fn default_pixel_scale() -> f32 {
    1.0
}

/// Configuration for the disease classifier.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ClassifierConfig {
    /// ONNX export of the trained model.
    pub model_path: PathBuf,
    /// Width of the model input in pixels.
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    /// Height of the model input in pixels.
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    /// Multiplier applied to every 0-255 channel value before inference.
    #[serde(default = "default_pixel_scale")]
    pub pixel_scale: f32,
    /// Class names in the order of the model outputs.
    pub class_names: Vec<String>,
}

impl ClassifierConfig {
    /// Create a classifier config for a 128x128 model fed raw pixel values.
    ///
    /// * `model_path`: path to the model file.
    /// * `class_names`: names of the model outputs, in order.
    pub fn new<I, N>(model_path: impl Into<PathBuf>, class_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            model_path: model_path.into(),
            input_width: default_input_size(),
            input_height: default_input_size(),
            pixel_scale: default_pixel_scale(),
            class_names: class_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Catch configs that could never classify anything.
    pub fn validate(&self) -> Result<()> {
        if self.class_names.is_empty() {
            return Err(PitayaError::InvalidConfig(String::from(
                "classifier needs at least one class name",
            )));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(PitayaError::InvalidConfig(format!(
                "classifier input of {}x{} pixels",
                self.input_width, self.input_height
            )));
        }
        Ok(())
    }
}

/// A model that turns a flattened NHWC image into one score per class.
pub trait ScoreModel {
    fn scores(&self, input: Vec<f32>) -> Result<Vec<f32>>;
}

fn inference_error(e: impl std::fmt::Display) -> PitayaError {
    PitayaError::Inference(e.to_string())
}

/// ONNX model optimised once at load time for a fixed input shape.
pub struct TractModel {
    plan: TypedRunnableModel<TypedModel>,
    /// `[1, height, width, channels]`
    input_shape: [usize; 4],
}

impl TractModel {
    /// Load and optimise a model for `[1, height, width, 3]` f32 input.
    ///
    /// * `path`: ONNX model file.
    /// * `width`: input width in pixels.
    /// * `height`: input height in pixels.
    pub fn load(path: &Path, width: u32, height: u32) -> Result<Self> {
        if !path.is_file() {
            return Err(PitayaError::ModelMissing(path.to_path_buf()));
        }
        let input_shape = [1, height as usize, width as usize, CHANNELS];
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.with_input_fact(0, f32::fact(input_shape).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(inference_error)?;
        Ok(Self { plan, input_shape })
    }

    /// Number of scores the model produces, when it is known statically.
    pub fn output_classes(&self) -> Option<usize> {
        let fact = self.plan.model().output_fact(0).ok()?;
        fact.shape.as_concrete()?.last().copied()
    }
}

impl ScoreModel for TractModel {
    fn scores(&self, input: Vec<f32>) -> Result<Vec<f32>> {
        let tensor = Tensor::from_shape(&self.input_shape, &input).map_err(inference_error)?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(inference_error)?;
        let output = outputs.first().ok_or(PitayaError::EmptyScores)?;
        let scores = output.to_array_view::<f32>().map_err(inference_error)?;
        Ok(scores.iter().copied().collect())
    }
}

/// Anything that can put a disease label on a capture.
pub trait DiseaseClassifier {
    fn classify(&self, image_path: &Path) -> Result<ClassificationResult>;
}

/// Plant disease classifier. Holds the one model instance for the life of
/// the process; nothing about it changes between calls.
pub struct ClassifierService {
    model: Box<dyn ScoreModel>,
    input_width: u32,
    input_height: u32,
    pixel_scale: f32,
    class_names: Vec<String>,
}

impl ClassifierService {
    /// Load the model named in the config. A missing or unreadable model is
    /// fatal for the station.
    ///
    /// * `config`: classifier config.
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;
        info!("Loading model {:?}...", config.model_path);
        let model = TractModel::load(&config.model_path, config.input_width, config.input_height)?;
        match model.output_classes() {
            Some(classes) if classes != config.class_names.len() => warn!(
                "Model has {classes} outputs but {} class names are configured",
                config.class_names.len()
            ),
            _ => {}
        }
        info!("Model loaded.");
        Ok(Self::with_model(Box::new(model), config))
    }

    /// Build the service around an already loaded model.
    ///
    /// * `model`: scoring model.
    /// * `config`: geometry, scaling and class names.
    pub fn with_model(model: Box<dyn ScoreModel>, config: &ClassifierConfig) -> Self {
        Self {
            model,
            input_width: config.input_width,
            input_height: config.input_height,
            pixel_scale: config.pixel_scale,
            class_names: config.class_names.clone(),
        }
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

impl DiseaseClassifier for ClassifierService {
    fn classify(&self, image_path: &Path) -> Result<ClassificationResult> {
        let image = load_resized(image_path, self.input_width, self.input_height)?;
        let scores = self.model.scores(to_nhwc(&image, self.pixel_scale))?;
        ClassificationResult::from_scores(scores, &self.class_names)
    }
}
