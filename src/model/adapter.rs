//! PEFT LoRA adapter layout: `adapter_config.json` plus a safetensors file of
//! `lora_A` / `lora_B` matrices keyed by the base model parameter they patch.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::ServiceError;

pub const CONFIG_FILE: &str = "adapter_config.json";
pub const WEIGHTS_FILE: &str = "adapter_model.safetensors";

const PEFT_PREFIX: &str = "base_model.model.";

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    pub r: usize,
    pub lora_alpha: f64,
    #[serde(default)]
    pub target_modules: Option<TargetModules>,
    #[serde(default)]
    pub fan_in_fan_out: bool,
    #[serde(default)]
    pub use_rslora: bool,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TargetModules {
    Names(Vec<String>),
    Pattern(String),
}

impl AdapterConfig {
    pub fn from_dir(dir: &Path) -> Result<Self, ServiceError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Err(ServiceError::Adapter(format!(
                "adapter config missing: {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(&path)?;
        let config: AdapterConfig = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Adapter(format!("invalid {CONFIG_FILE}: {e}")))?;
        if config.r == 0 {
            return Err(ServiceError::Adapter("LoRA rank `r` must be positive".into()));
        }
        Ok(config)
    }

    /// Multiplier applied to `B · A` before it is added to the base weight.
    pub fn scaling(&self) -> f64 {
        if self.use_rslora {
            self.lora_alpha / (self.r as f64).sqrt()
        } else {
            self.lora_alpha / self.r as f64
        }
    }

    pub fn describe_targets(&self) -> String {
        match &self.target_modules {
            Some(TargetModules::Names(names)) => names.join(","),
            Some(TargetModules::Pattern(pattern)) => pattern.clone(),
            None => "<unspecified>".to_string(),
        }
    }
}

pub fn weights_path(dir: &Path) -> Result<PathBuf, ServiceError> {
    let path = dir.join(WEIGHTS_FILE);
    if path.exists() {
        Ok(path)
    } else {
        Err(ServiceError::Adapter(format!(
            "adapter weights missing: {}",
            path.display()
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraPart {
    A,
    B,
}

/// Maps a PEFT tensor name to the base parameter it patches.
///
/// `base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight` and the
/// adapter-named form `...q_proj.lora_A.default.weight` both resolve to
/// `model.layers.0.self_attn.q_proj.weight`.
pub fn lora_target(name: &str) -> Option<(String, LoraPart)> {
    let name = name.strip_prefix(PEFT_PREFIX).unwrap_or(name);
    for (marker, part) in [(".lora_A.", LoraPart::A), (".lora_B.", LoraPart::B)] {
        if let Some(idx) = name.find(marker) {
            let rest = &name[idx + marker.len()..];
            if rest == "weight" || rest.ends_with(".weight") {
                return Some((format!("{}.weight", &name[..idx]), part));
            }
        }
    }
    None
}

#[derive(Debug)]
pub struct LoraPair<T> {
    pub a: T,
    pub b: T,
}

/// Groups adapter tensors into complete A/B pairs keyed by target parameter.
/// Tensors that are not LoRA matrices are ignored.
pub fn pair_lora_tensors<T>(
    tensors: impl IntoIterator<Item = (String, T)>,
) -> Result<BTreeMap<String, LoraPair<T>>, ServiceError> {
    let mut halves: BTreeMap<String, (Option<T>, Option<T>)> = BTreeMap::new();
    for (name, tensor) in tensors {
        let Some((target, part)) = lora_target(&name) else {
            continue;
        };
        let slot = halves.entry(target).or_insert((None, None));
        let half = match part {
            LoraPart::A => &mut slot.0,
            LoraPart::B => &mut slot.1,
        };
        if half.replace(tensor).is_some() {
            return Err(ServiceError::Adapter(format!("duplicate LoRA tensor: {name}")));
        }
    }

    let mut pairs = BTreeMap::new();
    for (target, halves) in halves {
        match halves {
            (Some(a), Some(b)) => {
                pairs.insert(target, LoraPair { a, b });
            }
            _ => {
                return Err(ServiceError::Adapter(format!(
                    "incomplete LoRA pair for {target}"
                )));
            }
        }
    }

    if pairs.is_empty() {
        return Err(ServiceError::Adapter("adapter contains no LoRA weights".into()));
    }
    Ok(pairs)
}
