use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use std::sync::Arc;

use relay_config::{ConfigLoader, RelayConfig, WarningSeverity};
use relay_core::{RelayError, Result};
use relay_llm::{LlmProvider, OpenAiProvider};
use relay_memory::MemoryStore;

mod run;
mod start;

/// Relay: streaming agent-conversation runtime
#[derive(Parser)]
#[command(name = "relay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to relay.toml config file
    #[arg(short, long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the WebSocket endpoint
    Start {
        /// Listen address, overriding server.listen
        #[arg(short = 'L', long)]
        listen: Option<String>,
    },
    /// Run one task without a server and print its events
    Run {
        /// The task prompt
        prompt: String,
        /// Print raw event frames instead of rendered text
        #[arg(long)]
        json: bool,
    },
    /// List stored top-level tasks, newest first
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Config first: it decides the log format.
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > logging.level
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Start { listen } => start::cmd_start(config, listen).await,
            Commands::Run { prompt, json } => run::cmd_run(config, prompt, json).await,
            Commands::Sessions { json } => Self::cmd_sessions(config, json),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Doctor => Self::cmd_doctor(&config, &config_loader),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_sessions(config: RelayConfig, json: bool) -> Result<()> {
        let store = MemoryStore::open(&config.memory.root)?;
        let sessions = store.list_sessions()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            return Ok(());
        }
        if sessions.is_empty() {
            println!("No stored tasks in {}", config.memory.root.display());
            return Ok(());
        }
        for s in &sessions {
            let when = chrono::DateTime::from_timestamp_millis(s.updated_at)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{when}  {}  {}", s.task_id, truncate_output(&s.title, 60));
        }
        Ok(())
    }

    fn cmd_config(config: &RelayConfig, json: bool) -> Result<()> {
        let mut shown = config.clone();
        if shown.services.openai_api_key.is_some() {
            shown.services.openai_api_key = Some("********".into());
        }
        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| RelayError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: &RelayConfig, loader: &ConfigLoader) -> Result<()> {
        println!("Relay doctor: {}", loader.path().display());
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };
        for w in &warnings {
            println!("  {w}");
        }

        let mut missing_key = 0;
        if config.services.openai_api_key.is_none() {
            println!("  warning: services.openai_api_key: not set");
            println!("   ↳ Set it in relay.toml or export OPENAI_API_KEY");
            missing_key = 1;
        }

        let warn_count = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Warning)
            .count()
            + missing_key;
        let info_count = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Info)
            .count();
        println!();
        println!("  {warn_count} warnings, {info_count} suggestions");
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("relay v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "relay", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// The configured model endpoint.
pub(crate) fn build_provider(config: &RelayConfig) -> Result<Arc<dyn LlmProvider>> {
    let key = config.services.openai_api_key.clone().ok_or_else(|| {
        RelayError::Config(
            "no API key: set services.openai_api_key in relay.toml or export OPENAI_API_KEY"
                .into(),
        )
    })?;
    let mut provider = OpenAiProvider::new(key);
    if let Some(ref url) = config.services.base_url {
        provider = provider.with_base_url(url.clone(), "openai-compatible".into());
    }
    Ok(Arc::new(provider))
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
