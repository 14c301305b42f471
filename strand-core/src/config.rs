//! Configuration types for Strand
//!
//! Configuration is layered with figment:
//!
//! 1. built-in defaults
//! 2. `strand.toml` in the working directory
//! 3. the file named by `STRAND_CONFIG_PATH`
//! 4. `STRAND_*` environment variables, with `__` separating sections
//!    (e.g. `STRAND_WORKFLOW__STEP_TIMEOUT=45s`, `STRAND_LLM__MODEL=gpt-4o`)
//!
//! The loaded config is read-only for the lifetime of a run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StrandError};
use crate::workflow::MatchPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    /// Generation capability
    pub llm: LLMProviderConfig,

    /// Runner defaults
    pub workflow: WorkflowConfig,
}

/// Which provider implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    /// Always fails with `Unavailable`
    Stub,
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    pub provider: LLMProvider,

    /// Default model; individual steps may override it
    pub model: String,

    /// Falls back to `OPENAI_API_KEY` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Falls back to `OPENAI_BASE_URL`, then the public endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default sampling temperature (0.0 - 2.0)
    pub temperature: f32,

    /// HTTP deadline for a single provider call
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<Duration>,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            request_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Defaults applied to every runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Per-invocation deadline; `None` waits indefinitely
    #[serde(with = "humantime_serde")]
    pub step_timeout: Option<Duration>,

    /// Produce/critique pairs before the reflect loop gives up
    pub reflect_max_iterations: usize,

    /// Tool-execution rounds before the tool loop gives up
    pub tool_loop_max_rounds: usize,

    /// How classifier output is matched against route labels
    pub route_match: MatchPolicy,

    /// Cap on simultaneously running parallel branches; `None` runs all at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_timeout: Some(Duration::from_secs(120)),
            reflect_max_iterations: 3,
            tool_loop_max_rounds: 10,
            route_match: MatchPolicy::Exact,
            max_concurrency: None,
        }
    }
}

impl StrandConfig {
    /// Load configuration from defaults, files and environment
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(StrandConfig::default()))
            .merge(Toml::file("strand.toml"));

        if let Ok(path) = std::env::var("STRAND_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let figment = figment.merge(
            Env::prefixed("STRAND_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        let config: StrandConfig = figment.extract().map_err(|e| {
            StrandError::Configuration(format!("Failed to load configuration: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a single TOML file over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        let config: StrandConfig = Figment::from(Serialized::defaults(StrandConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                StrandError::Configuration(format!(
                    "Failed to load configuration from {}: {e}",
                    path.display()
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no runner can honor
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(StrandError::Configuration(
                "llm.model must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(StrandError::Configuration(format!(
                "llm.temperature must be within 0.0-2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.workflow.reflect_max_iterations == 0 {
            return Err(StrandError::Configuration(
                "workflow.reflect_max_iterations must be at least 1".to_string(),
            ));
        }
        if self.workflow.tool_loop_max_rounds == 0 {
            return Err(StrandError::Configuration(
                "workflow.tool_loop_max_rounds must be at least 1".to_string(),
            ));
        }
        if self.workflow.max_concurrency == Some(0) {
            return Err(StrandError::Configuration(
                "workflow.max_concurrency must be at least 1 when set".to_string(),
            ));
        }
        if self.workflow.step_timeout == Some(Duration::ZERO) {
            return Err(StrandError::Configuration(
                "workflow.step_timeout must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
