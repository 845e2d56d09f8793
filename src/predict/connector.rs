// src/predict/connector.rs
use super::types::{ImageUpload, PredictError, PredictionResult};

/// Trait defining the interface to a fruit classification service
pub trait Predictor: Send + Sync {
    /// Submit one image and return the service's classification
    fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, PredictError>;
}
