//! Token accounting
//!
//! Counts are computed once per message at write time with a BPE encoding
//! matched to the summarization model when possible.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::MemoryError;
use crate::Result;

const DEFAULT_ENCODING: &str = "cl100k_base";

/// Model families tokenized with `o200k_base`
const O200K_MODEL_PREFIXES: &[&str] = &["gpt-4.1", "gpt-4o", "o1", "o3", "o4"];

fn is_o200k_model(model: &str) -> bool {
    let model = model.rsplit('/').next().unwrap_or(model);
    O200K_MODEL_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
    encoding: String,
}

impl TokenCounter {
    /// An explicit `encoding_name` wins over `model_name`; an unknown model
    /// falls back to `cl100k_base`.
    pub fn new(encoding_name: Option<&str>, model_name: Option<&str>) -> Result<Self> {
        if let Some(name) = encoding_name {
            return Self::for_encoding(name);
        }

        if let Some(model) = model_name.map(str::trim).filter(|m| !m.is_empty()) {
            if is_o200k_model(model) {
                debug!(model, "token counter resolved to o200k_base");
                return Self::for_encoding("o200k_base");
            }
            match tiktoken_rs::get_bpe_from_model(model) {
                Ok(bpe) => {
                    debug!(model, "token counter resolved from model");
                    return Ok(Self {
                        bpe: Arc::new(bpe),
                        encoding: format!("model:{}", model),
                    });
                }
                Err(_) => {
                    debug!(model, fallback = DEFAULT_ENCODING, "unknown model for tokenizer");
                }
            }
        }

        Self::for_encoding(DEFAULT_ENCODING)
    }

    pub fn for_encoding(name: &str) -> Result<Self> {
        let bpe = match name {
            "o200k_base" => tiktoken_rs::o200k_base(),
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => {
                return Err(MemoryError::InvalidConfig(format!(
                    "unknown token encoding '{}'",
                    other
                )))
            }
        }
        .map_err(|e| MemoryError::InvalidConfig(format!("failed to load {}: {}", name, e)))?;

        Ok(Self {
            bpe: Arc::new(bpe),
            encoding: name.to_string(),
        })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .finish()
    }
}
