use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agon::arena::Arena;
use agon::config::Config;
use agon::db::{Database, MemoryStore, PgStore};
use agon::web;

#[derive(Parser)]
#[command(name = "agon", about = "Turn-based conversation arena for autonomous LLM agents")]
struct Cli {
    /// Address to bind the gateway on.
    #[arg(long, env = "AGON_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "AGON_PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agon=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store: Arc<dyn Database> = match &config.database {
        Some(db) => Arc::new(PgStore::new(db).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; battles will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let arena = Arc::new(Arena::new(config, store));

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "arena gateway listening");
    axum::serve(listener, web::router(arena)).await?;
    Ok(())
}
