// src/predict/remote_model.rs
use anyhow::{anyhow, Result};
use log::{info, warn};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

use super::connector::Predictor;
use super::types::{interpret_response, ImageUpload, PredictError, PredictionResult};
use crate::config;

//Client for the remote fruit classifier's HTTP API
pub struct RemoteModel {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

impl RemoteModel {
    pub fn new(base_url: &str) -> Result<Self> {
        info!("Using fruit classifier backend at {}", base_url);

        //Only the connect phase is bounded; a prediction may take as long as the server needs
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(None)
            .build()?;

        Ok(Self::with_client(base_url, client))
    }

    fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    //Ask the backend's health endpoint whether it is up
    pub fn check_health(&self) -> Result<String> {
        let url = config::health_url(&self.base_url);
        let response = self.client.get(&url).send()?;

        if !response.status().is_success() {
            warn!("Backend health check returned status: {}", response.status());
            return Err(anyhow!("Backend responded with status {}", response.status()));
        }

        let health: HealthResponse = response.json()?;
        Ok(health.status)
    }
}

impl Predictor for RemoteModel {
    fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, PredictError> {
        info!(
            "Sending {} ({} bytes, {}) for prediction",
            upload.file_name,
            upload.bytes.len(),
            upload.mime
        );

        let part = multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime)
            .map_err(|e| PredictError::transport(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let url = config::predict_url(&self.base_url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    PredictError::transport(format!("Could not reach the prediction server: {}", e))
                } else {
                    PredictError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PredictError::transport(e.to_string()))?;

        if !status.is_success() {
            warn!("Prediction request failed with status {}", status);
        }

        interpret_response(status.is_success(), &body)
    }
}
