//! Init command implementation
//!
//! Scaffolds `bonlivre.toml`, `.env.example`, `.gitignore` and the `data/`
//! directory.

use super::output::Output;
use std::fs;

/// Result of the init operation
pub enum InitResult {
    Success,
    /// `bonlivre.toml` exists and `--force` was not given
    AlreadyExists,
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: std::path::PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// LLM provider to configure (openai or ollama)
    pub provider: String,
    pub host: String,
    pub port: u16,
    /// WooCommerce shop URL, left commented out when absent
    pub shop_url: Option<String>,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing BonlivreChat");

    let base_path = &config.path;

    let config_path = base_path.join("bonlivre.toml");
    if config_path.exists() && !config.force {
        output.warning("bonlivre.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    let data_dir = base_path.join("data");
    if data_dir.exists() {
        output.skipped("data", "already exists");
    } else if let Err(e) = fs::create_dir_all(&data_dir) {
        output.error(&format!("Failed to create data: {}", e));
        return InitResult::Error(e.to_string());
    } else {
        output.created("directory", "data");
    }

    let files = [
        ("bonlivre.toml", generate_config_toml(&config), config.force),
        (".env.example", generate_env_example(&config), config.force),
        (".gitignore", generate_gitignore(), false),
    ];

    for (name, content, force) in files {
        let path = base_path.join(name);
        if path.exists() && !force {
            output.skipped(name, "already exists");
            continue;
        }
        if let Err(e) = fs::write(&path, content) {
            output.error(&format!("Failed to create {}: {}", name, e));
            return InitResult::Error(e.to_string());
        }
        output.created("file", name);
    }

    output.success("BonlivreChat project initialized");

    output.header("Next Steps");
    output.info("1. Set up environment variables:");
    output.command("cp .env.example .env");
    output.command("# Edit .env and set JWT_SECRET (min 32 chars)");
    output.newline();

    if config.provider == "ollama" {
        output.info("2. Start Ollama (if not running):");
        output.command("ollama serve");
        output.newline();
    }

    output.info("3. Start the server:");
    output.command("bonlivre-server");

    output.hint(&format!(
        "Server will be available at http://{}:{}",
        config.host, config.port
    ));

    InitResult::Success
}

fn generate_config_toml(config: &InitConfig) -> String {
    let llm_section = if config.provider == "ollama" {
        r#"[llm]
provider = "ollama"
model = "llama3.2"
base_url = "http://localhost:11434""#
    } else {
        r#"[llm]
provider = "openai"
model = "gpt-3.5-turbo-16k"
api_key_env = "OPENAI_API_KEY""#
    };

    let commerce_section = match &config.shop_url {
        Some(url) => format!(
            "[commerce]\nbase_url = \"{}\"\nconsumer_key_env = \"WP_CONSUMER_KEY\"\nconsumer_secret_env = \"WP_CONSUMER_SECRET\"",
            url
        ),
        None => "[commerce]\n# base_url = \"https://bonlivre.ch\"\nconsumer_key_env = \"WP_CONSUMER_KEY\"\nconsumer_secret_env = \"WP_CONSUMER_SECRET\"".to_string(),
    };

    format!(
        r#"# BonlivreChat Configuration
# Generated by: bonlivre-server init
#
# Secrets are referenced by environment variable name. Changes to this file
# are picked up without a restart.

[server]
host = "{host}"
port = {port}
log_level = "info"
log_json = false
cors_origins = []

[auth]
jwt_secret_env = "JWT_SECRET"
token_ttl_secs = 3600
min_password_length = 8
app_base_url = "http://{host}:{port}"

[database]
path = "./data/bonlivre.db"
# turso_url = "libsql://your-db.turso.io"
# turso_token_env = "TURSO_AUTH_TOKEN"

{llm_section}
max_tokens = 2000
system_prompt = """
Du bist der freundliche Buchberater von Bonlivre. Antworte auf Deutsch und
empfiehl passende Bücher aus dem Sortiment.
"""

[context]
max_budget = 12000
chars_per_token = 2.5
budget_policy = "soft"

{commerce_section}

[cache]
ttl_secs = 300
max_entries = 1000

[session]
ttl_secs = 3300
renewal_window_secs = 300
check_interval_secs = 300
"#,
        host = config.host,
        port = config.port,
        llm_section = llm_section,
        commerce_section = commerce_section,
    )
}

fn generate_env_example(config: &InitConfig) -> String {
    let mut content = String::from(
        r#"# BonlivreChat Environment Variables
# Copy this file to .env and fill in the values.

# REQUIRED: JWT secret (minimum 32 characters)
# Generate with: openssl rand -base64 32
JWT_SECRET=change-me-in-production-use-at-least-32-characters

# Logging (overrides [server] log_level)
RUST_LOG=info,bonlivre=debug
"#,
    );

    if config.provider != "ollama" {
        content.push_str("\n# REQUIRED for the OpenAI provider\nOPENAI_API_KEY=sk-...\n");
    }

    content.push_str(
        "\n# WooCommerce REST credentials (required when [commerce] base_url is set)\n\
         WP_CONSUMER_KEY=ck_...\n\
         WP_CONSUMER_SECRET=cs_...\n",
    );

    content
}

fn generate_gitignore() -> String {
    r#"/data/
*.db
*.db-journal
.env
.bonlivre-session.json
/target/
"#
    .to_string()
}
