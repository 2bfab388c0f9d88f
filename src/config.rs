use crate::error::{QuarryError, Result};
use crate::types::SPECIAL_FIELD_PREFIX;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest writer heap tantivy accepts for a single indexing thread.
pub const MIN_WRITER_BUFFER_MB: usize = 15;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_]*$").expect("static regex"));

/// Whether `submit` drains on the caller's thread or hands off to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynchronizationMode {
    Immediate,
    Background,
}

impl std::str::FromStr for SynchronizationMode {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" | "singlethreaded" => Ok(SynchronizationMode::Immediate),
            "background" | "asyncbackgroundworker" => Ok(SynchronizationMode::Background),
            other => Err(QuarryError::Config(format!(
                "Unknown synchronization mode: {}",
                other
            ))),
        }
    }
}

/// How a text field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldIndexPolicy {
    /// Tokenized and lower-cased.
    #[default]
    Analyzed,
    /// Indexed verbatim as a single term.
    NotAnalyzed,
    /// Stored only.
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFieldDefinition {
    pub name: String,
    #[serde(default)]
    pub policy: FieldIndexPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub working_folder: PathBuf,
    pub synchronization: SynchronizationMode,
    pub optimization_commit_threshold: usize,
    pub writer_buffer_mb: usize,
    pub executive_timeout_secs: u64,
    pub machine_name: Option<String>,
    pub fields: Vec<IndexFieldDefinition>,
    pub include_categories: Vec<String>,
    pub exclude_categories: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            working_folder: PathBuf::from("./quarry-data"),
            synchronization: SynchronizationMode::Background,
            optimization_commit_threshold: 100,
            writer_buffer_mb: 20,
            executive_timeout_secs: 300,
            machine_name: None,
            fields: Vec::new(),
            include_categories: Vec::new(),
            exclude_categories: Vec::new(),
        }
    }
}

impl IndexerConfig {
    pub fn new<P: AsRef<Path>>(working_folder: P) -> Self {
        IndexerConfig {
            working_folder: working_folder.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = IndexerConfig::default();
        IndexerConfig {
            working_folder: env::var("QUARRY_WORKING_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.working_folder),
            synchronization: env::var("QUARRY_SYNC_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.synchronization),
            optimization_commit_threshold: env::var("QUARRY_OPTIMIZE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.optimization_commit_threshold),
            writer_buffer_mb: env::var("QUARRY_WRITER_BUFFER_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.writer_buffer_mb),
            executive_timeout_secs: env::var("QUARRY_EXECUTIVE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.executive_timeout_secs),
            machine_name: env::var("QUARRY_MACHINE_NAME").ok(),
            ..defaults
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with_synchronization(mut self, mode: SynchronizationMode) -> Self {
        self.synchronization = mode;
        self
    }

    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, policy: FieldIndexPolicy) -> Self {
        self.fields.push(IndexFieldDefinition {
            name: name.into(),
            policy,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.working_folder.as_os_str().is_empty() {
            return Err(QuarryError::Config(
                "working_folder must not be empty".to_string(),
            ));
        }
        if self.optimization_commit_threshold == 0 {
            return Err(QuarryError::Config(
                "optimization_commit_threshold must be at least 1".to_string(),
            ));
        }
        if self.writer_buffer_mb < MIN_WRITER_BUFFER_MB {
            return Err(QuarryError::Config(format!(
                "writer_buffer_mb {} is below the minimum of {}",
                self.writer_buffer_mb, MIN_WRITER_BUFFER_MB
            )));
        }
        if self.executive_timeout_secs == 0 {
            return Err(QuarryError::Config(
                "executive_timeout_secs must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for def in &self.fields {
            if def.name.starts_with(SPECIAL_FIELD_PREFIX) {
                return Err(QuarryError::Config(format!(
                    "field '{}' uses the reserved prefix '{}'",
                    def.name, SPECIAL_FIELD_PREFIX
                )));
            }
            if !FIELD_NAME_RE.is_match(&def.name) {
                return Err(QuarryError::Config(format!(
                    "field name '{}' is not a valid identifier",
                    def.name
                )));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(QuarryError::Config(format!(
                    "field '{}' is defined twice",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// Policy for `field`, `Analyzed` unless configured otherwise.
    pub fn policy_for(&self, field: &str) -> FieldIndexPolicy {
        self.fields
            .iter()
            .find(|d| d.name == field)
            .map(|d| d.policy)
            .unwrap_or_default()
    }

    /// True if items of `category` pass the include/exclude lists.
    pub fn accepts_category(&self, category: &str) -> bool {
        let matches = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(category));
        if matches(&self.exclude_categories) {
            return false;
        }
        self.include_categories.is_empty() || matches(&self.include_categories)
    }

    pub fn index_path(&self) -> PathBuf {
        self.working_folder.join("Index")
    }

    pub fn registration_path(&self) -> PathBuf {
        self.working_folder.join("executive.json")
    }

    pub fn writer_buffer_bytes(&self) -> usize {
        self.writer_buffer_mb * 1024 * 1024
    }

    pub fn executive_timeout(&self) -> Duration {
        Duration::from_secs(self.executive_timeout_secs)
    }

    /// Explicit name, else the host name, else `"unknown"`.
    pub fn resolve_machine_name(&self) -> String {
        self.machine_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        })
    }

    /// True if `name` can appear as a field path in a query string.
    pub fn is_valid_field_name(name: &str) -> bool {
        FIELD_NAME_RE.is_match(name)
    }
}
