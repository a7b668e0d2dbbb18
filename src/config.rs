use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use crate::protocol::Protocol;
use crate::transcript::Role;

/// Schema version accepted by this build. Bump when the task format breaks.
pub const SUPPORTED_VERSION: &str = "0.3";

/// Environment every run boots.
pub const MAIN_ENVIRONMENT: &str = "main";

/// A challenge definition, loaded once per run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub ruleset: RulesetConfig,
    pub environments: BTreeMap<String, EnvironmentConfig>,
    pub elicitations: Vec<Elicitation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RulesetConfig {
    pub max_turns: u32,
    pub flag: String,
}

/// Resource/security profile plus the files of the image build context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub docker: DockerConfig,
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub files_b64: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,

    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    /// Memory ceiling (e.g., "8g", "512m", or plain bytes)
    #[serde(default = "default_mem_limit")]
    pub mem_limit: String,

    #[serde(default = "default_cap_add")]
    pub cap_add: Vec<String>,

    /// Path to a seccomp JSON profile. The embedded profile is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,

    /// Substring marking an idle shell prompt on the last visible line.
    /// Defaults to `root@<hostname>:`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_marker: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            cpu_period: default_cpu_period(),
            cpu_quota: default_cpu_quota(),
            mem_limit: default_mem_limit(),
            cap_add: default_cap_add(),
            seccomp_profile: None,
            prompt_marker: None,
        }
    }
}

impl DockerConfig {
    /// The shell-prompt marker used for "returned to bash" detection.
    pub fn prompt_marker(&self) -> String {
        self.prompt_marker
            .clone()
            .unwrap_or_else(|| format!("root@{}:", self.hostname))
    }
}

/// A protocol choice plus the conversation seeded before the first live turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Elicitation {
    pub terminal_interop_protocol: Protocol,
    #[serde(default)]
    pub prefilled_messages: Vec<PrefilledMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefilledMessage {
    pub role: Role,
    pub content: String,
}

// Default value functions
fn default_hostname() -> String {
    "simurgh".to_string()
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_cpu_quota() -> i64 {
    200_000
}

fn default_mem_limit() -> String {
    "8g".to_string()
}

fn default_cap_add() -> Vec<String> {
    vec!["NET_RAW".to_string()]
}

#[derive(Serialize)]
struct NormalizedTask<'a> {
    version: &'a str,
    ruleset: &'a RulesetConfig,
    environments: &'a BTreeMap<String, EnvironmentConfig>,
}

impl TaskConfig {
    /// Load and validate a task from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read task config: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid task config: {}", path.display()))
    }

    /// Parse and validate a task from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse task TOML")?;

        for elicitation in &mut config.elicitations {
            for message in &mut elicitation.prefilled_messages {
                message.content = message.content.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.version == SUPPORTED_VERSION,
            "Unsupported task version '{}' (expected {SUPPORTED_VERSION})",
            self.version
        );
        ensure!(self.ruleset.max_turns > 0, "ruleset.max_turns must be positive");
        ensure!(!self.ruleset.flag.is_empty(), "ruleset.flag must not be empty");
        ensure!(
            self.environments.contains_key(MAIN_ENVIRONMENT),
            "Task must declare an environment named '{MAIN_ENVIRONMENT}'"
        );

        for (env_name, env) in &self.environments {
            for file in env.files.keys().chain(env.files_b64.keys()) {
                if !is_safe_relative_path(file) {
                    bail!("Environment '{env_name}' declares an unsafe file path: '{file}'");
                }
            }
        }

        Ok(())
    }

    /// The environment every run uses.
    pub fn main_environment(&self) -> Result<&EnvironmentConfig> {
        self.environments
            .get(MAIN_ENVIRONMENT)
            .with_context(|| format!("Task has no '{MAIN_ENVIRONMENT}' environment"))
    }

    /// Fetch an elicitation by index.
    pub fn elicitation(&self, index: usize) -> Result<&Elicitation> {
        self.elicitations.get(index).with_context(|| {
            format!(
                "Elicitation index {index} out of range (task has {})",
                self.elicitations.len()
            )
        })
    }

    /// TOML covering only the fields that change run semantics.
    pub fn to_normalized_toml(&self) -> Result<String> {
        let normalized = NormalizedTask {
            version: &self.version,
            ruleset: &self.ruleset,
            environments: &self.environments,
        };
        toml::to_string(&normalized).context("Failed to serialize task config")
    }
}

impl Elicitation {
    pub fn to_normalized_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize elicitation")
    }
}

impl EnvironmentConfig {
    /// Deterministic build fingerprint: identical content, identical hash.
    pub fn fingerprint(&self) -> Result<String> {
        let normalized = toml::to_string(self).context("Failed to serialize environment")?;
        Ok(sha256_hex(normalized.as_bytes()))
    }
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
