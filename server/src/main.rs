use std::sync::Arc;

use clap::Parser;

use redraft_core::config::{Config, Settings};
use redraft_core::prompts::PromptSet;
use redraft_core::provider::{build_provider, TextProvider};
use redraft_core::store::SqliteStore;
use redraft_core::Engine;

mod error;
mod routes;

#[derive(Parser, Debug)]
#[command(name = "redraft")]
#[command(about = "Document reconstruction service over LLM providers")]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redraft=info".parse().unwrap()),
        )
        .init();

    let config = Config::load_or_default();
    config.ensure_dirs()?;
    tracing::info!("Data directory: {:?}", config.data_dir);

    let mut settings = Settings::load(&config.settings_file);
    settings.apply_env();
    let Some(provider_config) = settings.provider.clone() else {
        anyhow::bail!(
            "no provider configured; set REDRAFT_ANTHROPIC_API_KEY or REDRAFT_OPENAI_API_KEY, \
             or edit {}",
            config.settings_file.display()
        );
    };
    let provider = build_provider(&provider_config);
    tracing::info!(
        provider = provider.provider_name(),
        model = provider.model_id(),
        "Provider configured"
    );

    let store = SqliteStore::open(&config.db_path).await?;
    let prompts = PromptSet::load(&config.prompts_file);
    let engine = Arc::new(Engine::new(settings, provider, Arc::new(store), prompts));

    let app = routes::router(engine);
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(bind = %args.bind, "Redraft server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");
    tracing::info!("Shutting down...");
}
