use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, maps to `relay.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub agent: AgentConfig,
    pub runtime: RuntimeConfig,
    pub memory: MemoryConfig,
    pub sandbox: SandboxConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

fn relay_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay")
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider, e.g. "gpt-4o".
    pub model: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Extra instructions prepended to the seeded system message.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_tokens: 8192,
            temperature: 0.2,
            system_prompt: None,
        }
    }
}

// ── Runtime ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Consecutive stream failures before escalating to a user-facing alert.
    pub max_consecutive_errors: u32,
    /// Ceiling on how long a parent waits for one sub-task.
    pub subtask_timeout_secs: u64,
    /// How many sibling sub-tasks run at once during a fan-out.
    pub subtask_batch_size: usize,
    /// Plain-text-only turns tolerated before the conversation yields to the user.
    pub max_no_tool_nudges: u32,
    /// Base delay before retrying a failed stream; grows linearly with the failure count.
    pub retry_backoff_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 3,
            subtask_timeout_secs: 30 * 60,
            subtask_batch_size: 3,
            max_no_tool_nudges: 3,
            retry_backoff_ms: 1000,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding one original + one front-end JSON document per conversation.
    pub root: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root: relay_home().join("tasks"),
        }
    }
}

// ── Sandbox ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent directory of the per-root-conversation workspaces.
    pub workspace_root: PathBuf,
    /// Shell used to run commands (`<shell> -c <command>`).
    pub shell: String,
    /// Per-command timeout in seconds. 0 = no timeout.
    pub command_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: relay_home().join("workspaces"),
            shell: "sh".into(),
            command_timeout_secs: 120,
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen address.
    pub listen: String,
    /// Enable permissive CORS (for front-end development).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3710".into(),
            cors: false,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Key for the OpenAI-compatible chat completions endpoint.
    pub openai_api_key: Option<String>,
    /// Base URL of the endpoint (defaults to api.openai.com).
    pub base_url: Option<String>,
}

// ── Validation ─────────────────────────────────────────────────

/// A configuration problem found by [`RelayConfig::validate`].
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{label}: {}: {}", self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {h}")?;
        }
        Ok(())
    }
}

impl RelayConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.agent.model.is_empty() {
            warnings.push(ConfigWarning {
                field: "agent.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'gpt-4o'".into()),
            });
        }

        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "agent.temperature".into(),
                message: format!("temperature {} is out of range", self.agent.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }

        if self.agent.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_tokens".into(),
                message: "max_tokens is 0; the model can't produce output".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 8192".into()),
            });
        }

        if self.runtime.max_consecutive_errors == 0 {
            warnings.push(ConfigWarning {
                field: "runtime.max_consecutive_errors".into(),
                message: "must be at least 1".into(),
                severity: WarningSeverity::Error,
                hint: Some("The default is 3".into()),
            });
        }

        if self.runtime.subtask_batch_size == 0 {
            warnings.push(ConfigWarning {
                field: "runtime.subtask_batch_size".into(),
                message: "batch size 0 would never start a sub-task".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        } else if self.runtime.subtask_batch_size > 16 {
            warnings.push(ConfigWarning {
                field: "runtime.subtask_batch_size".into(),
                message: format!(
                    "{} concurrent sub-tasks may overwhelm the model endpoint",
                    self.runtime.subtask_batch_size
                ),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        if self.runtime.subtask_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "runtime.subtask_timeout_secs".into(),
                message: "timeout is 0; every sub-task would time out immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("The default is 1800 (30 minutes)".into()),
            });
        }

        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:3710'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "binding to 0.0.0.0; server is accessible from all interfaces".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use 127.0.0.1 unless remote clients need access".into()),
            });
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some("Valid values: pretty, json".into()),
            });
        }

        if self.services.openai_api_key.is_none() && self.services.base_url.is_none() {
            warnings.push(ConfigWarning {
                field: "services.openai_api_key".into(),
                message: "no API key configured; the model endpoint will reject requests".into(),
                severity: WarningSeverity::Info,
                hint: Some("Set services.openai_api_key or export OPENAI_API_KEY".into()),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors.join("\n"))
        }
    }
}
