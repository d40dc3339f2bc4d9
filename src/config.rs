use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::GenerationParams;

const DEFAULT_PORT: u16 = 5001;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub base_model_id: String,
    pub revision: Option<String>,
    pub base_module_path: PathBuf,
    pub adapter_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub hf_token: Option<String>,
    pub eos_token: Option<String>,
    pub generation: GenerationParams,
    pub allowed_origins: Vec<String>,
    pub half_precision: bool,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            base_model_id: "google/gemma-2b-it".to_string(),
            revision: None,
            base_module_path: PathBuf::from("models/gemma-2b-it.ts"),
            adapter_path: PathBuf::from("turkish_law_finetuned_final"),
            tokenizer_path: None,
            hf_token: None,
            eos_token: None,
            generation: GenerationParams::default(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            half_precision: true,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let base_model_id = env::var("BASE_MODEL_ID").unwrap_or(defaults.base_model_id);
        let revision = non_empty_var("MODEL_REVISION");

        let base_module_path = env::var("BASE_MODULE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_module_path);
        let adapter_path = env::var("ADAPTER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.adapter_path);
        let tokenizer_path = non_empty_var("TOKENIZER_PATH").map(PathBuf::from);
        let hf_token = non_empty_var("HF_TOKEN");
        let eos_token = non_empty_var("EOS_TOKEN");

        let base = defaults.generation;
        let generation = GenerationParams {
            max_input_tokens: parse_var("MAX_INPUT_TOKENS").unwrap_or(base.max_input_tokens),
            max_new_tokens: parse_var("MAX_NEW_TOKENS").unwrap_or(base.max_new_tokens),
            temperature: parse_var("TEMPERATURE").unwrap_or(base.temperature),
            top_p: parse_var("TOP_P").unwrap_or(base.top_p),
            top_k: parse_var("TOP_K").unwrap_or(base.top_k),
            do_sample: env::var("DO_SAMPLE")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(base.do_sample),
            seed: parse_var("SEED"),
        };

        let allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or(defaults.allowed_origins);

        let half_precision = env::var("HALF_PRECISION")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.half_precision);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "auto".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            base_model_id,
            revision,
            base_module_path,
            adapter_path,
            tokenizer_path,
            hf_token,
            eos_token,
            generation,
            allowed_origins,
            half_precision,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower == "auto" {
        Device::cuda_if_available()
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_service() {
        let config = AppConfig::default();
        assert_eq!(config.listen_addr.port(), 5001);
        assert!(config.listen_addr.ip().is_unspecified());
        assert_eq!(config.base_model_id, "google/gemma-2b-it");
        assert_eq!(config.generation.max_input_tokens, 512);
        assert_eq!(config.generation.max_new_tokens, 256);
        assert_eq!(config.generation.top_k, 50);
        assert!(config.generation.do_sample);
        assert!(!config.allows_any_origin());
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let origins = parse_origins(" http://a.test , ,http://b.test");
        assert_eq!(origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn wildcard_origin_allows_any() {
        let config = AppConfig {
            allowed_origins: parse_origins("*"),
            ..AppConfig::default()
        };
        assert!(config.allows_any_origin());
    }

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
