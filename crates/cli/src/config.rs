//! `rapid.toml` configuration.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 60
//! max_body_bytes = 1048576
//!
//! [storage]
//! backend = "sqlite"
//! path = "rapid.db"
//!
//! [auth]
//! staff_keys = ["staff-key-1"]
//! ingest_key = "tracking-backend-key"
//!
//! [logging]
//! format = "text"
//!
//! [[problems]]
//! id = "block-v1:Org+Poll+2025+type@problem+block@q1"
//! enabled = true
//! choices = [
//!     { answer_id = "choice_0", answer_text = "wrong" },
//!     { answer_id = "choice_1", answer_text = "right" },
//! ]
//! ```
//!
//! Environment variables override the file: `RAPID_PORT`, `RAPID_DB`,
//! `RAPID_RATE_LIMIT`, `RAPID_STAFF_KEYS` (comma-separated).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rapid_core::{AnswerId, Catalog, Choice, ProblemDefinition, ProblemId};
use serde::{Deserialize, Serialize};

/// Config file picked up from the working directory when `--config` is absent.
pub(crate) const DEFAULT_CONFIG_FILE: &str = "rapid.toml";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) server: ServerConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) auth: AuthConfig,
    pub(crate) logging: LoggingConfig,
    pub(crate) problems: Vec<ProblemEntry>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    pub(crate) max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit: 60,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Backend {
    #[default]
    Sqlite,
    Memory,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StorageConfig {
    pub(crate) backend: Backend,
    pub(crate) path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            path: PathBuf::from("rapid.db"),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AuthConfig {
    /// Bearer tokens that carry the staff capability.
    pub(crate) staff_keys: Vec<String>,
    /// When set, `POST /events` requires this key.
    pub(crate) ingest_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LoggingConfig {
    pub(crate) format: LogFormat,
}

/// One `[[problems]]` entry, validated into a [`ProblemDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProblemEntry {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) choices: Vec<Choice>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("could not read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    /// Load from `path`, or from `rapid.toml` in the working directory if it
    /// exists, or fall back to defaults. Environment overrides are applied
    /// and the result is validated.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::read(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = var("RAPID_PORT") {
            self.server.port = value.trim().parse().map_err(|_| ConfigError::Env {
                name: "RAPID_PORT",
                value,
            })?;
        }
        if let Some(value) = var("RAPID_RATE_LIMIT") {
            self.server.rate_limit = value.trim().parse().map_err(|_| ConfigError::Env {
                name: "RAPID_RATE_LIMIT",
                value,
            })?;
        }
        if let Some(value) = var("RAPID_DB") {
            if value.is_empty() {
                return Err(ConfigError::Env {
                    name: "RAPID_DB",
                    value,
                });
            }
            self.storage.path = PathBuf::from(value);
        }
        if let Some(value) = var("RAPID_STAFF_KEYS") {
            self.auth.staff_keys = value
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    /// Check every problem and key, reporting all findings at once.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes must be greater than 0".to_string());
        }
        if self.auth.staff_keys.iter().any(|k| k.trim().is_empty()) {
            errors.push("auth.staff_keys contains an empty key".to_string());
        }
        if self
            .auth
            .ingest_key
            .as_deref()
            .is_some_and(|k| k.trim().is_empty())
        {
            errors.push("auth.ingest_key is empty".to_string());
        }

        let mut problem_ids = BTreeSet::new();
        for (index, problem) in self.problems.iter().enumerate() {
            if let Err(e) = ProblemId::parse(&problem.id) {
                errors.push(format!("problems[{index}]: {e}"));
            }
            if !problem_ids.insert(problem.id.as_str()) {
                errors.push(format!(
                    "problems[{index}]: problem '{}' is defined more than once",
                    problem.id
                ));
            }
            let mut answer_ids = BTreeSet::new();
            for choice in &problem.choices {
                if let Err(e) = AnswerId::parse(&choice.answer_id) {
                    errors.push(format!("problems[{index}] ({}): {e}", problem.id));
                }
                if !answer_ids.insert(choice.answer_id.as_str()) {
                    errors.push(format!(
                        "problems[{index}] ({}): answer_id '{}' is listed more than once",
                        problem.id, choice.answer_id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// The problem catalog the service looks choices up in.
    pub(crate) fn catalog(&self) -> Result<Catalog, ConfigError> {
        let mut definitions = Vec::with_capacity(self.problems.len());
        for problem in &self.problems {
            let id = ProblemId::parse(&problem.id)
                .map_err(|e| ConfigError::Invalid(vec![e.to_string()]))?;
            definitions.push(ProblemDefinition {
                id,
                enabled: problem.enabled,
                choices: problem.choices.clone(),
            });
        }
        Catalog::new(definitions).map_err(|e| ConfigError::Invalid(vec![e.to_string()]))
    }
}
