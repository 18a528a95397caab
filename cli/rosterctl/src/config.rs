//! Configuration loading.
//!
//! Handles:
//! - The TOML config file (run settings, policy table, endpoints)
//! - API tokens from the environment
//! - Default file locations

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use roster_reconcile::{AssignmentPolicy, PolicyConfig, RunConfig, SourceGroup};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Config file name.
const CONFIG_FILE: &str = "roster.toml";

/// Environment variable holding the LMS API token.
pub const CANVAS_TOKEN_ENV: &str = "ROSTER_CANVAS_TOKEN";

/// Environment variable holding the spreadsheet API token.
pub const SHEETS_TOKEN_ENV: &str = "ROSTER_SHEETS_TOKEN";

/// Default config path in the platform config directory.
pub fn default_config_path() -> Result<PathBuf> {
    ProjectDirs::from("edu", "roster", "roster")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Score a submission must have to qualify.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// How far back to look for graded submissions.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Tracked categories (assignment names).
    pub categories: Vec<String>,

    #[serde(default)]
    pub source_groups: Vec<SourceGroup>,

    #[serde(default)]
    pub policy: PolicyConfig,

    pub canvas: CanvasConfig,

    pub sheets: SheetsConfig,

    #[serde(default)]
    pub state: StateConfig,
}

fn default_score_threshold() -> f64 {
    1.0
}

fn default_lookback_days() -> u32 {
    30
}

/// LMS endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Spreadsheet endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,

    /// Tab holding the ledger.
    #[serde(default = "default_tab")]
    pub tab: String,

    #[serde(default = "default_sheets_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tab() -> String {
    "SE".to_string()
}

fn default_sheets_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Rotation state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Relative paths resolve against the config file's directory.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("rotation.json")
}

impl RosterConfig {
    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml_str(&contents, path.parent())
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Parse a config. `base_dir` anchors a relative state path.
    pub fn from_toml_str(contents: &str, base_dir: Option<&Path>) -> Result<Self> {
        let mut config: Self = toml::from_str(contents).context("invalid config TOML")?;

        if let Some(base_dir) = base_dir {
            if config.state.path.is_relative() {
                config.state.path = base_dir.join(&config.state.path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.score_threshold.is_finite() {
            anyhow::bail!("score_threshold must be a finite number");
        }
        if self.categories.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("categories must not contain blank names");
        }
        if self.canvas.base_url.trim().is_empty() {
            anyhow::bail!("canvas.base_url must be set");
        }
        if self.sheets.spreadsheet_id.trim().is_empty() {
            anyhow::bail!("sheets.spreadsheet_id must be set");
        }
        // Surface bad rules before anything talks to the network.
        self.build_policy()?;
        Ok(())
    }

    /// Members conditional rules are evaluated against.
    pub fn reference_set(&self) -> Vec<String> {
        self.source_groups.iter().map(SourceGroup::id).collect()
    }

    pub fn build_policy(&self) -> Result<AssignmentPolicy> {
        let reference = self.reference_set();
        AssignmentPolicy::build(&self.policy, reference.iter().map(String::as_str))
            .context("invalid assignment policy")
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            source_groups: self.source_groups.clone(),
            categories: self.categories.clone(),
            score_threshold: self.score_threshold,
            lookback_days: self.lookback_days,
        }
    }
}

/// API tokens. Never stored in the config file.
#[derive(Clone)]
pub struct Secrets {
    pub canvas_token: String,
    pub sheets_token: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self, CliError> {
        Ok(Self {
            canvas_token: require_env(CANVAS_TOKEN_ENV)?,
            sheets_token: require_env(SHEETS_TOKEN_ENV)?,
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").finish_non_exhaustive()
    }
}

fn require_env(name: &'static str) -> Result<String, CliError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(CliError::MissingToken(name))
}
