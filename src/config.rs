use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OntoKgError, Result};
use crate::ontology::{Persona, PropertyTieBreak};

/// Main configuration structure.
///
/// Serializable so that a run can freeze an exact snapshot of it on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub ontology: OntologyConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Where runs live and how loudly they log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Parent directory of all run directories
    pub runs_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub temperature: f32,
}

/// Committee settings for ontology synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyConfig {
    #[serde(default = "default_committee_size")]
    pub committee_size: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Per-proposal timeout; a proposal that times out is left out of the vote
    #[serde(default = "default_timeout_secs")]
    pub proposal_timeout_secs: u64,
    #[serde(default)]
    pub property_tie_break: PropertyTieBreak,
    /// Continue with the last valid draft when the committee does not converge
    #[serde(default = "default_true")]
    pub accept_partial: bool,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            committee_size: default_committee_size(),
            max_rounds: default_max_rounds(),
            proposal_timeout_secs: default_timeout_secs(),
            property_tie_break: PropertyTieBreak::default(),
            accept_partial: true,
        }
    }
}

/// KG extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Extra attempts per chunk after the first (with relaxed parsing)
    #[serde(default = "default_chunk_retries")]
    pub chunk_retries: usize,
    /// Chunks dispatched concurrently; results are still merged in chunk order
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default)]
    pub min_confidence: f32,
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            chunk_retries: default_chunk_retries(),
            concurrency: default_concurrency(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            min_confidence: 0.0,
            chunk_size_tokens: default_chunk_size_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
        }
    }
}

/// Graph database hand-off
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_chunk_timeout_secs() -> u64 {
    180
}

fn default_max_retries() -> usize {
    3
}

fn default_committee_size() -> usize {
    3
}

fn default_max_rounds() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_epochs() -> usize {
    1
}

fn default_chunk_retries() -> usize {
    1
}

fn default_concurrency() -> usize {
    1
}

fn default_chunk_size_tokens() -> usize {
    300
}

fn default_chunk_overlap_tokens() -> usize {
    50
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in ONTOKG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("ONTOKG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate a specific config file
    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            OntoKgError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(OntoKgError::Config("llm.model must not be empty".to_string()));
        }

        if self.ontology.committee_size == 0 {
            return Err(OntoKgError::Config(
                "ontology.committee_size must be greater than 0".to_string(),
            ));
        }

        if self.ontology.committee_size > Persona::ALL.len() {
            return Err(OntoKgError::Config(format!(
                "ontology.committee_size must be at most {} (one member per persona)",
                Persona::ALL.len()
            )));
        }

        if self.ontology.max_rounds == 0 {
            return Err(OntoKgError::Config(
                "ontology.max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.extraction.epochs == 0 {
            return Err(OntoKgError::Config(
                "extraction.epochs must be at least 1".to_string(),
            ));
        }

        if self.extraction.concurrency == 0 {
            return Err(OntoKgError::Config(
                "extraction.concurrency must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.extraction.min_confidence) {
            return Err(OntoKgError::Config(
                "extraction.min_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.extraction.chunk_size_tokens == 0 {
            return Err(OntoKgError::Config(
                "extraction.chunk_size_tokens must be greater than 0".to_string(),
            ));
        }

        if self.extraction.chunk_overlap_tokens >= self.extraction.chunk_size_tokens {
            return Err(OntoKgError::Config(
                "extraction.chunk_overlap_tokens must be less than chunk_size_tokens".to_string(),
            ));
        }

        Ok(())
    }

    /// Read the API key named by `llm.api_key_env`
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.llm.api_key_env).map_err(|_| {
            OntoKgError::Config(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                self.llm.api_key_env
            ))
        })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.run.runs_dir
    }
}
