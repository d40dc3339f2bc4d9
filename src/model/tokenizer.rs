use tokenizers::{FromPretrainedParameters, Tokenizer};
use tracing::{info, warn};

use crate::{config::AppConfig, error::ServiceError};

const EOS_CANDIDATES: [&str; 4] = ["<eos>", "</s>", "<|endoftext|>", "<|end_of_text|>"];

/// Loads the tokenizer from `TOKENIZER_PATH`, or from the hub by base model id.
pub fn load_tokenizer(config: &AppConfig) -> Result<Tokenizer, ServiceError> {
    match config.tokenizer_path.as_ref() {
        Some(path) => {
            info!(path = %path.display(), "loading tokenizer from file");
            Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
        None => {
            info!(model = %config.base_model_id, "fetching tokenizer from hub");
            let params = FromPretrainedParameters {
                revision: config.revision.clone().unwrap_or_else(|| "main".to_string()),
                auth_token: config.hf_token.clone(),
                ..Default::default()
            };
            Tokenizer::from_pretrained(&config.base_model_id, Some(params))
                .map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
    }
}

/// Id of the end-of-sequence token, which also serves as pad token.
pub fn resolve_eos_token(tokenizer: &Tokenizer, configured: Option<&str>) -> Option<u32> {
    if let Some(token) = configured {
        match tokenizer.token_to_id(token) {
            Some(id) => return Some(id),
            None => warn!(token, "configured EOS token is not in the vocabulary"),
        }
    }
    EOS_CANDIDATES
        .iter()
        .find_map(|candidate| tokenizer.token_to_id(candidate))
}

/// Encodes with special tokens and keeps at most `max_tokens` leading ids.
pub fn encode_prompt(
    tokenizer: &Tokenizer,
    prompt: &str,
    max_tokens: usize,
) -> Result<Vec<i64>, ServiceError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
    Ok(encoding
        .get_ids()
        .iter()
        .take(max_tokens)
        .map(|&id| i64::from(id))
        .collect())
}

pub fn decode(tokenizer: &Tokenizer, ids: &[i64]) -> Result<String, ServiceError> {
    let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
    tokenizer
        .decode(&ids, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "<eos>", "single_word": false, "lstrip": false,
             "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<eos>": 0, "miras": 1, "hukuku": 2, "nedir": 3, "[UNK]": 4},
            "unk_token": "[UNK]"
        }
    }"#;

    fn word_level() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, TOKENIZER_JSON).unwrap();
        let config = AppConfig {
            tokenizer_path: Some(path),
            ..AppConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn loads_local_tokenizer_file() {
        let (_dir, config) = word_level();
        let tokenizer = load_tokenizer(&config).unwrap();
        assert_eq!(tokenizer.token_to_id("hukuku"), Some(2));
    }

    #[test]
    fn eos_is_detected_from_known_names() {
        let (_dir, config) = word_level();
        let tokenizer = load_tokenizer(&config).unwrap();
        assert_eq!(resolve_eos_token(&tokenizer, None), Some(0));
        assert_eq!(resolve_eos_token(&tokenizer, Some("nedir")), Some(3));
        assert_eq!(resolve_eos_token(&tokenizer, Some("<missing>")), Some(0));
    }

    #[test]
    fn prompt_is_truncated_to_budget() {
        let (_dir, config) = word_level();
        let tokenizer = load_tokenizer(&config).unwrap();
        assert_eq!(encode_prompt(&tokenizer, "miras hukuku nedir", 2).unwrap(), vec![1, 2]);
        assert_eq!(encode_prompt(&tokenizer, "miras hukuku nedir", 512).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn decode_skips_special_tokens() {
        let (_dir, config) = word_level();
        let tokenizer = load_tokenizer(&config).unwrap();
        assert_eq!(decode(&tokenizer, &[1, 2, 0]).unwrap(), "miras hukuku");
    }
}
