use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::pool::WorkerBounds;
use crate::record::{DocumentLabels, FieldSchema, DEFAULT_FIELDS, DEFAULT_KEY_FIELD};

const DEFAULT_CONFIG_FILE: &str = "contract_diff";
const ENV_PREFIX: &str = "CDIFF";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime settings: defaults < config file < `CDIFF_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_workers: usize,
    pub min_workers: usize,
    pub worker_cap: usize,
    /// Per external call; 0 disables.
    pub call_timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub extract_max_tokens: u32,
    pub compare_max_tokens: u32,
    pub key_field: String,
    pub fields: Vec<String>,
    pub label_a: String,
    pub label_b: String,
}

impl Default for Settings {
    fn default() -> Self {
        let labels = DocumentLabels::default();
        Settings {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            max_workers: 5,
            min_workers: 2,
            worker_cap: 10,
            call_timeout_secs: 120,
            max_retries: 3,
            temperature: 0.2,
            extract_max_tokens: 16_000,
            compare_max_tokens: 8_000,
            key_field: DEFAULT_KEY_FIELD.to_string(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            label_a: labels.first,
            label_b: labels.second,
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default
    /// `contract_diff.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, SettingsError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.key_field.trim().is_empty() {
            return Err(SettingsError::Invalid("key_field must not be empty".into()));
        }
        if self.fields.is_empty() {
            return Err(SettingsError::Invalid("fields must list at least one attribute".into()));
        }
        if self.min_workers == 0 || self.min_workers > self.worker_cap {
            return Err(SettingsError::Invalid(format!(
                "worker bounds [{}, {}] are not a valid range",
                self.min_workers, self.worker_cap
            )));
        }
        Ok(())
    }

    /// Configured key, else `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn field_schema(&self) -> FieldSchema {
        FieldSchema::new(self.key_field.clone(), self.fields.clone())
    }

    pub fn labels(&self) -> DocumentLabels {
        DocumentLabels {
            first: self.label_a.clone(),
            second: self.label_b.clone(),
        }
    }

    pub fn worker_bounds(&self) -> WorkerBounds {
        WorkerBounds {
            min: self.min_workers,
            max: self.worker_cap,
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// `CDIFF_*` variables; `CDIFF_FIELDS` is a comma-separated list.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("fields")
}

// ── Tests ──
