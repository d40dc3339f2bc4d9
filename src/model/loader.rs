use std::{collections::HashMap, path::Path, time::Instant};

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        CausalLm, GenerationParams, ModelMetadata,
        adapter::{self, AdapterConfig, LoraPair},
        sampling::Sampler,
        tokenizer,
    },
};

/// TorchScript base model with a LoRA adapter merged into its weights.
pub struct AdaptedModel {
    base_model: String,
    adapter: String,
    lora_pairs: usize,
    kind: Kind,
    device: Device,
    tokenizer: Tokenizer,
    eos_token_id: Option<u32>,
    module: Mutex<tch::CModule>,
}

impl AdaptedModel {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let module_path = config.base_module_path.as_path();
        if !module_path.exists() {
            return Err(ServiceError::ModelLoad(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }

        info!(
            base_model = %config.base_model_id,
            path = %module_path.display(),
            device = ?config.device,
            "loading base model"
        );
        let mut module = tch::CModule::load_on_device(module_path, config.device)
            .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        module.set_eval();
        info!("base model loaded");

        info!(path = %config.adapter_path.display(), "loading LoRA adapters");
        let lora_pairs = merge_adapter(
            &module,
            &config.adapter_path,
            &config.base_model_id,
            config.device,
        )?;

        // Merge happens in the checkpoint's precision; halve afterwards.
        // `CModule::to` panics on libtorch errors; the registry catches it.
        let kind = if config.half_precision && config.device.is_cuda() {
            Kind::Half
        } else {
            Kind::Float
        };
        module.to(config.device, kind, false);

        let tokenizer = tokenizer::load_tokenizer(config)?;
        let eos_token_id = tokenizer::resolve_eos_token(&tokenizer, config.eos_token.as_deref());
        if eos_token_id.is_none() {
            warn!("no EOS token found; generation always runs to the token budget");
        }
        info!(?eos_token_id, ?kind, "model loaded successfully");

        Ok(Self {
            base_model: config.base_model_id.clone(),
            adapter: config.adapter_path.display().to_string(),
            lora_pairs,
            kind,
            device: config.device,
            tokenizer,
            eos_token_id,
            module: Mutex::new(module),
        })
    }

    fn next_token_logits(
        &self,
        module: &tch::CModule,
        input_ids: &[i64],
    ) -> Result<Vec<f32>, ServiceError> {
        let input_tensor = Tensor::from_slice(input_ids)
            .reshape([1, input_ids.len() as i64])
            .to(self.device);

        // Traced causal LMs return either bare logits or (logits, past, ...).
        let output = module
            .forward_is(&[IValue::Tensor(input_tensor)])
            .map_err(|e| ServiceError::Inference(e.to_string()))?;
        let logits = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Inference(
                        "Expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(ServiceError::Inference(
                    "Unexpected model output format".into(),
                ));
            }
        };

        // [1, seq_len, vocab] -> [vocab]
        let last = logits
            .select(1, -1)
            .squeeze()
            .to_kind(Kind::Float)
            .to_device(Device::Cpu);
        Vec::<f32>::try_from(&last).map_err(|e| ServiceError::Inference(e.to_string()))
    }
}

impl CausalLm for AdaptedModel {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ServiceError> {
        let mut input_ids =
            tokenizer::encode_prompt(&self.tokenizer, prompt, params.max_input_tokens)?;
        let prompt_token_len = input_ids.len();
        let eos = self.eos_token_id.map(i64::from);
        let mut sampler = Sampler::new(params);

        let start = Instant::now();
        no_grad(|| {
            let module = self.module.lock();
            for _ in 0..params.max_new_tokens {
                let logits = self.next_token_logits(&module, &input_ids)?;
                let next_token_id = i64::from(sampler.sample(&logits));
                input_ids.push(next_token_id);
                if Some(next_token_id) == eos {
                    break;
                }
            }
            Ok::<(), ServiceError>(())
        })?;

        let tokens_generated = input_ids.len() - prompt_token_len;
        let elapsed = start.elapsed();
        debug!(
            prompt_tokens = prompt_token_len,
            tokens_generated,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation finished"
        );

        tokenizer::decode(&self.tokenizer, &input_ids)
    }

    fn metadata(&self) -> Option<ModelMetadata> {
        Some(ModelMetadata {
            base_model: self.base_model.clone(),
            adapter: self.adapter.clone(),
            lora_pairs: self.lora_pairs,
            dtype: format!("{:?}", self.kind),
        })
    }
}

/// Folds every LoRA pair into its base weight: `W += scaling * (B @ A)`.
fn merge_adapter(
    module: &tch::CModule,
    dir: &Path,
    base_model_id: &str,
    device: Device,
) -> Result<usize, ServiceError> {
    let adapter_config = AdapterConfig::from_dir(dir)?;
    if let Some(declared) = adapter_config.base_model_name_or_path.as_deref() {
        if declared != base_model_id {
            warn!(declared, base_model_id, "adapter was trained on a different base model");
        }
    }

    let weights = Tensor::read_safetensors(adapter::weights_path(dir)?).map_err(adapter_err)?;
    let pairs = adapter::pair_lora_tensors(weights)?;

    let params: HashMap<String, Tensor> = module
        .named_parameters()
        .map_err(adapter_err)?
        .into_iter()
        .collect();
    let scaling = adapter_config.scaling();

    no_grad(|| {
        for (target, pair) in &pairs {
            merge_pair(
                &params,
                target,
                pair,
                scaling,
                adapter_config.fan_in_fan_out,
                device,
            )?;
            debug!(target = %target, "merged LoRA pair");
        }
        Ok::<(), ServiceError>(())
    })?;

    info!(
        pairs = pairs.len(),
        scaling,
        targets = %adapter_config.describe_targets(),
        "LoRA adapters loaded"
    );
    Ok(pairs.len())
}

fn adapter_err(e: tch::TchError) -> ServiceError {
    ServiceError::Adapter(e.to_string())
}

/// `scaling * (B @ A)` in f32 on `device`, transposed for `fan_in_fan_out`.
fn lora_delta(
    a: &Tensor,
    b: &Tensor,
    scaling: f64,
    fan_in_fan_out: bool,
    device: Device,
) -> Result<Tensor, ServiceError> {
    let a = a
        .f_to_device(device)
        .and_then(|t| t.f_to_kind(Kind::Float))
        .map_err(adapter_err)?;
    let b = b
        .f_to_device(device)
        .and_then(|t| t.f_to_kind(Kind::Float))
        .map_err(adapter_err)?;
    let delta = b
        .f_matmul(&a)
        .and_then(|t| t.f_mul_scalar(scaling))
        .map_err(adapter_err)?;
    if fan_in_fan_out {
        delta.f_transpose(0, 1).map_err(adapter_err)
    } else {
        Ok(delta)
    }
}

/// Adds one pair's delta to its target parameter in place.
fn merge_pair(
    params: &HashMap<String, Tensor>,
    target: &str,
    pair: &LoraPair<Tensor>,
    scaling: f64,
    fan_in_fan_out: bool,
    device: Device,
) -> Result<(), ServiceError> {
    let weight = params.get(target).ok_or_else(|| {
        ServiceError::Adapter(format!("base model has no parameter {target}"))
    })?;
    let delta = lora_delta(&pair.a, &pair.b, scaling, fan_in_fan_out, device)?;
    if delta.size() != weight.size() {
        return Err(ServiceError::Adapter(format!(
            "shape mismatch for {target}: base {:?}, adapter {:?}",
            weight.size(),
            delta.size()
        )));
    }
    let delta = delta.f_to_kind(weight.kind()).map_err(adapter_err)?;
    let mut weight = weight.shallow_clone();
    weight.f_add_(&delta).map_err(adapter_err)?;
    Ok(())
}
