pub mod adapter;
mod registry;
pub mod sampling;
pub mod tokenizer;
mod traits;
mod types;

#[cfg(feature = "tch-backend")]
mod loader;

#[cfg(feature = "tch-backend")]
pub use loader::AdaptedModel;
pub use registry::ModelRegistry;
pub use traits::CausalLm;
pub use types::{AnswerRequest, AnswerResponse, GenerationParams, HealthResponse, ModelMetadata};
