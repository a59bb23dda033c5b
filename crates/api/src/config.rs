//! Configuration loading with env-var overrides.
//!
//! Reads an optional TOML file (`NOVELGRAPH_CONFIG`, default
//! `novelgraph.toml`), loads `.env`, then applies `NOVELGRAPH_*` and
//! `NEO4J_*` overrides. Missing sections and keys take their defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use extract::GenerationOptions;
use ingest::ChunkerConfig;
use pipeline::PipelineConfig;

pub const DEFAULT_CONFIG_PATH: &str = "novelgraph.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
    pub neo4j: Neo4jConfig,
    pub progress: ProgressConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Transport timeout for one generation call.
    pub timeout_secs: u64,
    /// From `LLM_API_KEY` only, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.1,
            timeout_secs: 300,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub ledger_path: PathBuf,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("data/progress/processed_chunks.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub default_source_path: Option<PathBuf>,
    pub reset_before_run: bool,
    pub context_limit: usize,
    pub bind: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_source_path: None,
            reset_before_run: false,
            context_limit: 20,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// `.env` first, then the TOML file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env");
        }

        let path = env::var("NOVELGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file_or_default(&path)?;
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply overrides from `lookup`, usually the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NOVELGRAPH_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_var("NOVELGRAPH_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("NOVELGRAPH_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_var("NOVELGRAPH_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("NOVELGRAPH_LLM_PROVIDER") {
            self.llm.provider = parse_var("NOVELGRAPH_LLM_PROVIDER", &v)?;
        }
        if let Some(v) = get("NOVELGRAPH_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("NOVELGRAPH_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("NOVELGRAPH_TEMPERATURE") {
            self.llm.temperature = parse_var("NOVELGRAPH_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("NEO4J_URI") {
            self.neo4j.uri = v;
        }
        if let Some(v) = get("NEO4J_USER") {
            self.neo4j.user = v;
        }
        if let Some(v) = get("NEO4J_PASSWORD") {
            self.neo4j.password = v;
        }
        if let Some(v) = get("NOVELGRAPH_LEDGER_PATH") {
            self.progress.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = get("NOVELGRAPH_SOURCE") {
            self.run.default_source_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NOVELGRAPH_RESET") {
            self.run.reset_before_run = parse_flag("NOVELGRAPH_RESET", &v)?;
        }
        if let Some(v) = get("NOVELGRAPH_BIND") {
            self.run.bind = v;
        }

        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunker: ChunkerConfig {
                target_size: self.chunking.chunk_size,
                overlap_size: self.chunking.chunk_overlap,
            },
            context_limit: self.run.context_limit,
            generation: GenerationOptions {
                model: self.llm.model.clone(),
                temperature: self.llm.temperature,
            },
            reset_before_run: self.run.reset_before_run,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
