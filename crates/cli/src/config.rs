//! Configuration loading: YAML file plus environment-variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vrenamer_common::{Language, StyleSpec, SubtaskSpec};
use vrenamer_llm_gateway::Transport;

#[derive(Debug, Clone, Deserialize)]
pub struct LlmBackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_transport() -> String {
    "openai_compat".to_string()
}
fn default_model() -> String {
    "gemini-pro-vision".to_string()
}
fn default_timeout() -> u64 {
    30
}

impl LlmBackendConfig {
    pub fn transport(&self) -> Transport {
        match self.transport.as_str() {
            "native" => Transport::Native,
            _ => Transport::OpenAiCompat,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_task_concurrency")]
    pub task_concurrency: usize,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_task_concurrency() -> usize {
    4
}
fn default_batch_concurrency() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSettingsConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_target_frames")]
    pub target_frames: usize,
}

fn default_batch_size() -> usize {
    20
}
fn default_batch_size_max() -> usize {
    50
}
fn default_top_k() -> usize {
    3
}
fn default_target_frames() -> usize {
    96
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamingSettingsConfig {
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default = "default_candidates_per_style")]
    pub candidates_per_style: usize,
    #[serde(default = "default_total_candidates")]
    pub total_candidates: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_illegal_chars_replacement")]
    pub illegal_chars_replacement: char,
}

fn default_candidates_per_style() -> usize {
    1
}
fn default_total_candidates() -> usize {
    5
}
fn default_max_length() -> usize {
    80
}
fn default_illegal_chars_replacement() -> char {
    '_'
}

#[derive(Debug, Clone, Deserialize)]
struct RawStyleSpec {
    id: String,
    label: String,
    language: String,
    examples: Vec<String>,
    prompt_ref: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm_backend: LlmBackendConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub analysis: AnalysisSettingsConfig,
    #[serde(default)]
    pub naming: NamingSettingsConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    #[serde(default)]
    pub subtasks: Vec<SubtaskSpec>,
    #[serde(default)]
    styles: Vec<RawStyleSpec>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("./prompts")
}
fn default_audit_log() -> PathBuf {
    PathBuf::from("./vrenamer_audit.jsonl")
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            task_concurrency: default_task_concurrency(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for AnalysisSettingsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_size_max: default_batch_size_max(),
            top_k: default_top_k(),
            target_frames: default_target_frames(),
        }
    }
}

impl Default for NamingSettingsConfig {
    fn default() -> Self {
        Self {
            styles: Vec::new(),
            candidates_per_style: default_candidates_per_style(),
            total_candidates: default_total_candidates(),
            max_length: default_max_length(),
            illegal_chars_replacement: default_illegal_chars_replacement(),
        }
    }
}

impl Config {
    /// Load `path` (or `./vrenamer.yaml` if not given and it exists),
    /// then apply `VRENAMER_*` environment overrides for the keys named
    /// in the spec's configuration table.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = PathBuf::from("./vrenamer.yaml");
        let path = path.map(Path::to_path_buf).unwrap_or(default_path);

        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            serde_yaml::from_str(
                "llm_backend:\n  base_url: \"http://localhost:8000\"\n  api_key: \"\"\n",
            )?
        };

        if let Ok(v) = std::env::var("VRENAMER_LLM_BASE_URL") {
            config.llm_backend.base_url = v;
        }
        if let Ok(v) = std::env::var("VRENAMER_LLM_API_KEY") {
            config.llm_backend.api_key = v;
        }
        if let Ok(v) = std::env::var("VRENAMER_TASK_CONCURRENCY") {
            config.concurrency.task_concurrency = v.parse().context("VRENAMER_TASK_CONCURRENCY")?;
        }
        if let Ok(v) = std::env::var("VRENAMER_BATCH_CONCURRENCY") {
            config.concurrency.batch_concurrency =
                v.parse().context("VRENAMER_BATCH_CONCURRENCY")?;
        }
        if let Ok(v) = std::env::var("VRENAMER_LOG_LEVEL") {
            config.log_level = v;
        }

        Ok(config)
    }

    pub fn style_specs(&self) -> Result<Vec<StyleSpec>> {
        self.styles
            .iter()
            .map(|s| {
                let language = match s.language.as_str() {
                    "zh" => Language::Zh,
                    "en" => Language::En,
                    other => anyhow::bail!("unsupported style language: {other}"),
                };
                Ok(StyleSpec {
                    id: s.id.clone(),
                    label: s.label.clone(),
                    language,
                    examples: s.examples.clone(),
                    prompt_ref: s.prompt_ref.clone(),
                })
            })
            .collect()
    }
}
