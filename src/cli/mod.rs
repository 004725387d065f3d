//! CLI module for BonlivreChat
//!
//! Command-line parsing for the `bonlivre-server` binary. Uses clap for
//! argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::utils::toml_config::{BonlivreConfig, ConfigError};
use output::Output;

/// BonlivreChat - LLM book advisor for the Bonlivre shop
#[derive(Parser, Debug)]
#[command(
    name = "bonlivre-server",
    version,
    about = "BonlivreChat - LLM book advisor server",
    long_about = "Chat server for the Bonlivre bookshop with WooCommerce product and order lookups.\n\n\
                  Run without arguments to start the server, or use 'init' to scaffold a configuration.",
    after_help = "EXAMPLES:\n    \
                  bonlivre-server init                      # Scaffold bonlivre.toml and .env.example\n    \
                  bonlivre-server init --provider ollama    # Use a local Ollama model\n    \
                  bonlivre-server                           # Start the server (requires bonlivre.toml)\n    \
                  bonlivre-server config --validate         # Check the configuration"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "bonlivre.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Create bonlivre.toml, .env.example and the data directory
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,

        /// LLM provider to configure (openai or ollama)
        #[arg(long, default_value = "openai", value_parser = ["openai", "ollama"])]
        provider: String,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "3000")]
        port: u16,

        /// WooCommerce shop URL
        #[arg(long)]
        shop_url: Option<String>,
    },

    /// Show configuration information
    Config {
        /// Validate the configuration, including referenced env vars
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn output(&self) -> Output {
        if self.no_color {
            Output::no_color()
        } else {
            Output::new()
        }
    }
}

/// Print the effective configuration. Secrets are shown by env var name only.
pub fn show_config(path: &Path, validate: bool, output: &Output) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let config: BonlivreConfig = if validate {
        BonlivreConfig::load(path)?
    } else {
        toml::from_str(&std::fs::read_to_string(path)?)?
    };

    output.header(&format!("Configuration ({})", path.display()));
    output.kv("server", &format!("{}:{}", config.server.host, config.server.port));
    output.kv("log_level", &config.server.log_level);
    output.kv("database", &config.database.turso_url.clone().unwrap_or(config.database.path.clone()));
    output.kv("jwt_secret_env", &config.auth.jwt_secret_env);
    output.kv("token_ttl_secs", &config.auth.token_ttl_secs.to_string());
    output.kv("llm", &format!("{:?} / {}", config.llm.provider, config.llm.model));
    output.kv(
        "context",
        &format!(
            "budget {} ({:?}, {} chars/token)",
            config.context.max_budget, config.context.budget_policy, config.context.chars_per_token
        ),
    );
    output.kv(
        "commerce",
        config.commerce.base_url.as_deref().unwrap_or("disabled"),
    );
    output.kv(
        "session",
        &format!(
            "ttl {}s, renewal window {}s",
            config.session.ttl_secs, config.session.renewal_window_secs
        ),
    );

    if validate {
        output.success("Configuration is valid");
    }
    Ok(())
}
