//! bonlivre-server - entry point.
//!
//! Without a subcommand the server starts:
//! 1. Load `.env` and `bonlivre.toml`.
//! 2. Initialise tracing (JSON or pretty, per `[server] log_json`).
//! 3. Open the database and wire up the application state.
//! 4. Start the config watcher and the blacklist purge task.
//! 5. Serve HTTP until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bonlivre::{
    api::build_app,
    cli::{
        init::{self, InitConfig, InitResult},
        output::Output,
        show_config, Cli, Commands,
    },
    db::TokenBlacklist,
    AppState, ConfigManager, TursoClient,
};
use tracing::{info, warn};

/// How often revoked tokens past their expiry are dropped
const BLACKLIST_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut cli = Cli::parse_args();
    let output = cli.output();

    match cli.command.take() {
        Some(Commands::Init {
            path,
            force,
            provider,
            host,
            port,
            shop_url,
        }) => {
            let result = init::run(
                InitConfig {
                    path,
                    force,
                    provider,
                    host,
                    port,
                    shop_url,
                },
                &output,
            );
            match result {
                InitResult::Success | InitResult::AlreadyExists => Ok(()),
                InitResult::Error(e) => Err(anyhow::anyhow!(e)),
            }
        }
        Some(Commands::Config { validate }) => {
            show_config(&cli.config, validate, &output)?;
            Ok(())
        }
        Some(Commands::Serve) | None => serve(&cli, &output).await,
    }
}

async fn serve(cli: &Cli, output: &Output) -> anyhow::Result<()> {
    let config_manager = match ConfigManager::new(&cli.config) {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            output.error(&format!("Failed to load {}: {}", cli.config.display(), e));
            output.hint("Run 'bonlivre-server init' to create a configuration");
            return Err(e.into());
        }
    };
    let config = config_manager.config();

    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => {
            let level = if cli.verbose { "debug" } else { config.server.log_level.as_str() };
            match level.parse::<tracing_subscriber::EnvFilter>() {
                Ok(f) => f,
                Err(e) => {
                    eprintln!(
                        "WARN: log_level '{}' is not a valid tracing filter ({}); falling back to 'info'",
                        level, e
                    );
                    tracing_subscriber::EnvFilter::new("info")
                }
            }
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if config.server.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "bonlivre-server starting");

    let state = AppState::from_config(Arc::clone(&config_manager))
        .await
        .context("failed to initialise application state")?;

    if let Err(e) = config_manager.start_watching() {
        warn!(error = %e, "Config hot-reload disabled");
    }

    tokio::spawn(purge_blacklist(Arc::clone(&state.db)));

    let app = build_app(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid [server] host/port")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    config_manager.stop_watching();
    info!("bonlivre-server stopped");
    Ok(())
}

async fn purge_blacklist(db: Arc<TursoClient>) {
    let mut interval = tokio::time::interval(BLACKLIST_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        match db.purge_expired_tokens(chrono::Utc::now().timestamp()).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged expired blacklist entries"),
            Err(e) => warn!(error = %e, "Blacklist purge failed"),
        }
    }
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
