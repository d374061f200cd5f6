//! Runtime configuration loaded from `.pommel.toml` at the project root, or
//! defaults when the file is absent — never an error, mirroring the
//! state store's "missing file → default" rule.

use crate::{PommelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = ".pommel.toml";

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_rrf_k() -> u32 {
    60
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_candidates_for_rerank() -> usize {
    50
}
fn default_reranker_timeout_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}
fn default_include() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_fallback() -> RerankFallback {
    RerankFallback::Heuristic
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankFallback {
    Heuristic,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub fallback: RerankFallback,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { enabled: false, timeout_ms: default_reranker_timeout_ms(), fallback: default_fallback() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 0 disables the size check.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Overrides the embedder-declared dimension when set.
    pub embedding_dimension: Option<usize>,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_candidates_for_rerank")]
    pub candidates_for_rerank: usize,
    #[serde(default = "default_true")]
    pub hybrid_enabled: bool,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub bind_host: Option<String>,
    pub port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            debounce_ms: default_debounce_ms(),
            embedding_dimension: None,
            rrf_k: default_rrf_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            candidates_for_rerank: default_candidates_for_rerank(),
            hybrid_enabled: default_true(),
            reranker: RerankerConfig::default(),
            cache_capacity: default_cache_capacity(),
            include: default_include(),
            exclude: Vec::new(),
            bind_host: None,
            port: None,
        }
    }
}

impl Config {
    /// Loads `<project_root>/.pommel.toml`; a missing file yields defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(body) => toml::from_str(&body).map_err(|e| PommelError::ConfigInvalid(e.to_string())),
            Err(_) => Ok(Config::default()),
        }
    }

    /// Field-level validation beyond what TOML deserialization already enforces.
    pub fn validate(&self) -> Result<()> {
        if self.rrf_k == 0 {
            return Err(PommelError::ConfigInvalid("rrf_k must be > 0".into()));
        }
        if self.vector_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(PommelError::ConfigInvalid("weights must be non-negative".into()));
        }
        if self.include.is_empty() {
            return Err(PommelError::ConfigInvalid("include patterns must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.rrf_k, 60);
        assert!((config.vector_weight - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_file_fills_in_remaining_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "max_file_size = 1024\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.rrf_k, 60);
    }

    #[test]
    fn invalid_toml_is_config_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "not = [valid\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn validate_rejects_zero_rrf_k() {
        let mut config = Config::default();
        config.rrf_k = 0;
        assert!(config.validate().is_err());
    }
}
