// src/predict/types.rs
use serde::Deserialize;
use thiserror::Error;

/// Message shown when the backend rejects a request without saying why.
pub const BACKEND_FALLBACK_MESSAGE: &str = "Request failed";

/// Message shown when a failure carries no text of its own.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong while processing the image.";

/// Qualifier appended to the confidence when the model is unsure.
pub const NOT_CONFIDENT_QUALIFIER: &str = " (model not confident)";

/// A file-like payload for the `file` field of the multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }
}

/// Successful classification returned by `/predict`.
///
/// `is_confident` and `class_names` are optional on the wire: a backend that
/// leaves them out simply gets no qualifier and no class list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f64,
    #[serde(default)]
    pub is_confident: Option<bool>,
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
}

impl PredictionResult {
    /// Confidence as a percentage with two decimals, e.g. `92.00%`,
    /// followed by a qualifier when the model reported low confidence.
    pub fn confidence_label(&self) -> String {
        let mut label = format!("{:.2}%", self.confidence * 100.0);
        if self.is_confident == Some(false) {
            label.push_str(NOT_CONFIDENT_QUALIFIER);
        }
        label
    }

    pub fn class_list(&self) -> Option<String> {
        self.class_names.as_ref().map(|names| names.join(", "))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    /// Non-success HTTP status; the text comes from the response body.
    #[error("{0}")]
    Backend(String),
    /// The request never completed.
    #[error("{0}")]
    Transport(String),
    /// The response body could not be understood.
    #[error("{0}")]
    Decode(String),
}

impl PredictError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(non_empty_or_generic(message.into()))
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(non_empty_or_generic(message.into()))
    }
}

fn non_empty_or_generic(message: String) -> String {
    if message.trim().is_empty() {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        message
    }
}

/// Turn a raw `/predict` response into a result.
///
/// The body is parsed as JSON before the status is looked at, so a non-JSON
/// body is a decode failure whatever the status was.
pub fn interpret_response(success: bool, body: &str) -> Result<PredictionResult, PredictError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PredictError::decode(format!("Invalid response from server: {}", e)))?;

    if !success {
        let message = serde_json::from_value::<ErrorBody>(value)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| BACKEND_FALLBACK_MESSAGE.to_string());
        return Err(PredictError::Backend(message));
    }

    serde_json::from_value(value)
        .map_err(|e| PredictError::decode(format!("Unexpected prediction format: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_full_success_body() {
        let body = r#"{"predicted_class":"apple","confidence":0.92,"is_confident":true,"class_names":["apple","banana"]}"#;
        let result = interpret_response(true, body).unwrap();
        assert_eq!(result.predicted_class, "apple");
        assert_eq!(result.confidence_label(), "92.00%");
        assert_eq!(result.class_list().as_deref(), Some("apple, banana"));
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let result = interpret_response(true, r#"{"predicted_class":"kiwi","confidence":0.5}"#).unwrap();
        assert_eq!(result.is_confident, None);
        assert_eq!(result.class_list(), None);
        assert_eq!(result.confidence_label(), "50.00%");
    }

    #[rstest]
    #[case(0.0, Some(true), "0.00%")]
    #[case(1.0, None, "100.00%")]
    #[case(0.1234, Some(true), "12.34%")]
    #[case(0.4, Some(false), "40.00% (model not confident)")]
    fn confidence_label_cases(
        #[case] confidence: f64,
        #[case] is_confident: Option<bool>,
        #[case] expected: &str,
    ) {
        let result = PredictionResult {
            predicted_class: "pear".into(),
            confidence,
            is_confident,
            class_names: None,
        };
        assert_eq!(result.confidence_label(), expected);
    }

    #[rstest]
    #[case(r#"{"error":"invalid image"}"#, "invalid image")]
    #[case(r#"{"detail":"nope"}"#, BACKEND_FALLBACK_MESSAGE)]
    #[case(r#"{"error":""}"#, BACKEND_FALLBACK_MESSAGE)]
    #[case(r#"[1,2,3]"#, BACKEND_FALLBACK_MESSAGE)]
    fn error_status_uses_error_field_or_fallback(#[case] body: &str, #[case] expected: &str) {
        let err = interpret_response(false, body).unwrap_err();
        assert_eq!(err, PredictError::Backend(expected.to_string()));
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn non_json_body_is_a_decode_error_even_on_error_status() {
        let err = interpret_response(false, "<html>502</html>").unwrap_err();
        assert!(matches!(err, PredictError::Decode(_)));
    }

    #[test]
    fn success_with_wrong_shape_is_a_decode_error() {
        let err = interpret_response(true, r#"{"status":"ok"}"#).unwrap_err();
        assert!(matches!(err, PredictError::Decode(_)));
    }

    #[test]
    fn empty_transport_message_falls_back() {
        assert_eq!(PredictError::transport("").to_string(), GENERIC_FAILURE_MESSAGE);
        assert_eq!(PredictError::transport("refused").to_string(), "refused");
    }
}
