//! Configuration system for deepdive.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/deepdive/config.toml` and/or `.deepdive/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{ModelAliases, PlanningMode};

/// Upper bound on claims extracted from a draft report.
pub const MAX_CLAIMS_LIMIT: usize = 25;

/// Headroom added to the derived flow step limit.
const FLOW_STEP_SLACK: usize = 16;

/// Top-level configuration for deepdive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepdiveConfig {
    pub research: ResearchConfig,
    pub llm: LlmConfig,
    pub corpus: CorpusConfig,
}

/// Limits and knobs for a single research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Identifier of the corpus to search (e.g. an `owner/repo` collection).
    pub corpus: String,
    /// Maximum results requested per search call.
    pub max_results: usize,
    /// Maximum number of planner/retriever iterations.
    pub max_depth: usize,
    /// Which query shapes the planner generates.
    pub search_mode: PlanningMode,
    /// Use the worker-pool variants of the retriever and claim verifier.
    pub parallel: bool,
    /// Worker pool size for the parallel variants.
    pub max_workers: usize,
    /// Results requested per claim when searching for evidence.
    pub evidence_limit: usize,
    /// Maximum claims extracted from a draft (never above 25).
    pub max_claims: usize,
    /// Maximum clarifying questions asked before planning.
    pub max_clarifying_questions: usize,
    /// Pause after a compaction before retrying the report, in milliseconds.
    pub compaction_delay_ms: u64,
    /// Hard ceiling on flow steps for one run. Derived from `max_depth` and
    /// the retry budgets when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_flow_steps: Option<usize>,
    /// Model aliases handed to the LLM invoker.
    pub models: ModelAliases,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            corpus: String::new(),
            max_results: 10,
            max_depth: 3,
            search_mode: PlanningMode::Hybrid,
            parallel: true,
            max_workers: 4,
            evidence_limit: 3,
            max_claims: MAX_CLAIMS_LIMIT,
            max_clarifying_questions: 4,
            compaction_delay_ms: 5_000,
            max_flow_steps: None,
            models: ModelAliases::default(),
        }
    }
}

impl ResearchConfig {
    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_results == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_results must be greater than 0".into(),
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_workers must be greater than 0".into(),
            });
        }
        if self.max_claims == 0 || self.max_claims > MAX_CLAIMS_LIMIT {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.max_claims must be between 1 and {MAX_CLAIMS_LIMIT}, got {}",
                    self.max_claims
                ),
            });
        }
        if let Some(limit) = self.max_flow_steps
            && limit < self.required_flow_steps()
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.max_flow_steps must be at least {} for max_depth {}, got {limit}",
                    self.required_flow_steps(),
                    self.max_depth
                ),
            });
        }
        if self.models.fast.trim().is_empty() || self.models.reasoning.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "research.models.fast and research.models.reasoning must be set".into(),
            });
        }
        Ok(())
    }

    /// Steps the longest legal run can take: initial research and
    /// clarification, every planner/retriever iteration plus the claims
    /// refinement and the closing planner, two report/verify rounds, three
    /// compactions and two proceed-anyway passes, then the final report and
    /// `End`.
    pub fn required_flow_steps(&self) -> usize {
        let setup = 2;
        let research = 2 * (self.max_depth + 1) + 1;
        let verification = 2 * 2;
        let compaction = 2 * (3 + 2);
        let finish = 2;
        setup + research + verification + compaction + finish
    }

    /// The step limit handed to the flow.
    pub fn flow_step_limit(&self) -> usize {
        self.max_flow_steps
            .unwrap_or_else(|| self.required_flow_steps() + FLOW_STEP_SLACK)
    }
}

/// Configuration for the OpenAI-compatible LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: 0.2,
            timeout_secs: 300,
        }
    }
}

/// Configuration for the corpus service (search + conversation fetch).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Base URL of the corpus service.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DEEPDIVE_`)
/// 3. Workspace-local config (`.deepdive/config.toml`)
/// 4. User config (`~/.config/deepdive/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepdiveConfig>,
) -> Result<DeepdiveConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepdiveConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPDIVE_RESEARCH__MAX_DEPTH, DEEPDIVE_LLM__BASE_URL, ...
    figment = figment.merge(Env::prefixed("DEEPDIVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".deepdive").join("config.toml")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "deepdive", "deepdive")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Check whether any deepdive configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write a default configuration to `.deepdive/config.toml` in the workspace.
///
/// Refuses to overwrite an existing file.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let content =
        toml::to_string_pretty(&DeepdiveConfig::default()).map_err(|e| ConfigError::Serialize {
            message: e.to_string(),
        })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid {
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    std::fs::write(&path, content).map_err(|e| ConfigError::Invalid {
        message: format!("cannot write {}: {e}", path.display()),
    })?;
    Ok(path)
}
