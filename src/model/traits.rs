use crate::{
    error::ServiceError,
    model::{GenerationParams, ModelMetadata},
};

/// A loaded model + tokenizer pair that can complete a prompt.
///
/// `generate` returns the decoded text of the whole output sequence, prompt
/// included, with special tokens skipped. Callers strip the prompt
/// themselves. Implementations block for the full generation and are called
/// from a blocking worker thread.
pub trait CausalLm: Send + Sync {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ServiceError>;

    fn metadata(&self) -> Option<ModelMetadata> {
        None
    }
}
