use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tokio::task;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{CausalLm, GenerationParams, ModelMetadata},
    prompt,
};

/// Process-wide model handle. Either holds a fully loaded model + tokenizer
/// or nothing; built once at startup and shared by every request.
pub struct ModelRegistry {
    model: Option<Arc<dyn CausalLm>>,
    load_error: Option<String>,
}

impl ModelRegistry {
    /// Loads the configured model. Failures, including panics raised by the
    /// backend (libtorch OOM during a cast), are logged and leave the
    /// registry unloaded instead of aborting startup.
    pub fn initialize(config: &AppConfig) -> Self {
        let registry = Self::from_loader(|| load_model(config));
        if registry.is_ready() {
            info!(base_model = %config.base_model_id, "model ready");
        }
        registry
    }

    fn from_loader<F>(load: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn CausalLm>, ServiceError>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(load)).unwrap_or_else(|payload| {
            Err(ServiceError::ModelLoad(format!(
                "loader panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        match outcome {
            Ok(model) => Self::with_model(model),
            Err(err) => {
                error!(error = %err, "failed to load model; serving in degraded mode");
                Self {
                    model: None,
                    load_error: Some(err.to_string()),
                }
            }
        }
    }

    pub fn with_model(model: Arc<dyn CausalLm>) -> Self {
        Self {
            model: Some(model),
            load_error: None,
        }
    }

    pub fn unloaded() -> Self {
        Self {
            model: None,
            load_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.model.as_ref().and_then(|model| model.metadata())
    }

    /// Runs the prompt template through one generation pass and returns the
    /// text following the answer marker.
    pub async fn answer(
        &self,
        question: &str,
        params: &GenerationParams,
    ) -> Result<String, ServiceError> {
        let model = self.model.clone().ok_or(ServiceError::ModelNotLoaded)?;
        let prompt = prompt::build_prompt(question);
        let decoded = spawn_inference(model, prompt, params.clone()).await?;
        Ok(prompt::extract_answer(&decoded))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

async fn spawn_inference(
    model: Arc<dyn CausalLm>,
    prompt: String,
    params: GenerationParams,
) -> Result<String, ServiceError> {
    task::spawn_blocking(move || model.generate(&prompt, &params))
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
}

#[cfg(feature = "tch-backend")]
fn load_model(config: &AppConfig) -> Result<Arc<dyn CausalLm>, ServiceError> {
    let model = crate::model::loader::AdaptedModel::load(config)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tch-backend"))]
fn load_model(_config: &AppConfig) -> Result<Arc<dyn CausalLm>, ServiceError> {
    Err(ServiceError::ModelLoad(
        "built without the tch-backend feature; no inference backend available".into(),
    ))
}
