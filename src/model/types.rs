use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Decoding settings for one generation pass. Fixed per process.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_input_tokens: usize,
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub do_sample: bool,
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_input_tokens: 512,
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            do_sample: true,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    #[serde(default)]
    pub question: Option<String>,
}

impl AnswerRequest {
    /// Returns the question, rejecting absent or empty input. Whitespace is
    /// passed through to the model unchanged.
    pub fn question(&self) -> Result<&str, ServiceError> {
        match self.question.as_deref() {
            Some(question) if !question.is_empty() => Ok(question),
            _ => Err(ServiceError::MissingQuestion),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

impl HealthResponse {
    pub fn ready() -> Self {
        Self {
            status: "ok".to_string(),
            message: "Model is ready".to_string(),
        }
    }

    pub fn not_loaded() -> Self {
        Self {
            status: "error".to_string(),
            message: ServiceError::ModelNotLoaded.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub base_model: String,
    pub adapter: String,
    pub lora_pairs: usize,
    pub dtype: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_empty_questions_are_rejected() {
        for body in [r#"{}"#, r#"{"question": ""}"#, r#"{"question": null}"#] {
            let request: AnswerRequest = serde_json::from_str(body).unwrap();
            assert!(matches!(request.question(), Err(ServiceError::MissingQuestion)), "{body}");
        }
    }

    #[test]
    fn question_is_passed_through_untrimmed() {
        let request: AnswerRequest =
            serde_json::from_str(r#"{"question": " Kira sözleşmesi nedir? "}"#).unwrap();
        assert_eq!(request.question().unwrap(), " Kira sözleşmesi nedir? ");
    }

    #[test]
    fn whitespace_only_question_reaches_the_model() {
        let request: AnswerRequest = serde_json::from_str(r#"{"question": "  \n"}"#).unwrap();
        assert_eq!(request.question().unwrap(), "  \n");
    }
}
