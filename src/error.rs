use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error("No question provided")]
    MissingQuestion,
    #[error("{0}")]
    BadRequest(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model load error: {0}")]
    ModelLoad(String),
    #[error("adapter error: {0}")]
    Adapter(String),
    // Surfaced to callers verbatim.
    #[error("{0}")]
    Inference(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingQuestion | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::ModelNotLoaded
            | ServiceError::ModelLoad(_)
            | ServiceError::Tokenizer(_)
            | ServiceError::Adapter(_)
            | ServiceError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(ServiceError::MissingQuestion.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::BadRequest("expected a JSON body".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn inference_message_is_not_decorated() {
        let err = ServiceError::Inference("CUDA out of memory".into());
        assert_eq!(err.to_string(), "CUDA out of memory");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn load_failure_is_labelled_as_such() {
        let err = ServiceError::ModelLoad("model artifact missing: models/base.ts".into());
        assert_eq!(err.to_string(), "model load error: model artifact missing: models/base.ts");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unloaded_model_is_a_server_error() {
        let err = ServiceError::ModelNotLoaded;
        assert_eq!(err.to_string(), "Model not loaded");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
