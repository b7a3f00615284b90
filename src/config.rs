use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;

use crate::data::feed::RowFormat;
use crate::fixtures::calendar::RoundWindow;
use crate::forecast::aggregate::ConflictPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
    pub aggregation: AggregationConfig,
    pub sources: SourcesConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub rounds: Vec<RoundWindow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Prefer weights saved by `calibrate --apply` over the configured ones.
    #[serde(default)]
    pub use_stored_weights: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_concurrency: usize,
    pub endpoints: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Feed,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub tournament: String,
    pub weight: Decimal,
    pub kind: SourceKind,
    /// URL or path; `{round}` is replaced with the source's round number.
    pub location: String,
    #[serde(default)]
    pub format: RowFormat,
    /// Added to the competition round id for sources that number rounds differently.
    #[serde(default)]
    pub round_offset: i64,
    /// Environment variable holding an API key for this source.
    pub api_key_env: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

fn default_api_key_header() -> String {
    "Authorization".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Directory holding `fixtures/`, `results/` and `submissions/`.
    pub data_dir: PathBuf,
    /// Treat fixtures left without a pick as a failed submission.
    #[serde(default)]
    pub require_all_picks: bool,
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
#[derive(Default)]
pub struct Secrets {
    /// Feed API keys by source name.
    pub source_keys: HashMap<String, SecretString>,
}

impl Secrets {
    pub fn from_env(sources: &SourcesConfig) -> Self {
        let source_keys = sources
            .endpoints
            .iter()
            .filter_map(|source| {
                let var = source.api_key_env.as_ref()?;
                match std::env::var(var) {
                    Ok(value) => Some((source.name.clone(), SecretString::from(value))),
                    Err(_) => {
                        tracing::warn!(source = %source.name, env = %var, "API key variable not set");
                        None
                    }
                }
            })
            .collect();
        Self { source_keys }
    }
}

impl AppConfig {
    /// Load configuration from `path`, overlaying environment variables for secrets.
    pub fn load(path: &Path) -> Result<(Self, Secrets)> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let secrets = Secrets::from_env(&config.sources);

        Ok((config, secrets))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sources.max_concurrency == 0 {
            bail!("sources.max_concurrency must be at least 1");
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources.endpoints {
            if source.weight < Decimal::ZERO {
                bail!("source {} has a negative weight", source.name);
            }
            if !seen.insert(source.name.as_str()) {
                bail!("source {} is configured twice", source.name);
            }
        }
        Ok(())
    }
}
