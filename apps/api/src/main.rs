mod config;
mod db;
mod dm;
mod errors;
mod llm_client;
mod models;
mod outreach;
mod routes;
mod runs;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::dm::chrome::ChromeLauncher;
use crate::dm::targeting::IndustryCatalog;
use crate::llm_client::LlmClient;
use crate::outreach::candidate::DedupScope;
use crate::outreach::ledger::{JsonFileLedger, Ledger};
use crate::routes::build_router;
use crate::runs::RunRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Outreach API v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.data_dir).await?;

    // Initialize SQLite
    let db = create_pool(&config.database_url).await?;

    // Initialize ledgers (one shared file when email and DM dedup together)
    let (email_ledger, dm_ledger): (Arc<dyn Ledger>, Arc<dyn Ledger>) = match config.dedup_scope {
        DedupScope::PerChannel => (
            Arc::new(JsonFileLedger::open(config.email_ledger_path()).await?),
            Arc::new(JsonFileLedger::open(config.dm_ledger_path()).await?),
        ),
        DedupScope::Shared => {
            let shared: Arc<dyn Ledger> =
                Arc::new(JsonFileLedger::open(config.shared_ledger_path()).await?);
            (shared.clone(), shared)
        }
    };
    info!("Ledgers ready (scope: {:?})", config.dedup_scope);

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone());
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let industries = IndustryCatalog::load(config.industry_codes_path.as_deref())?;

    // Build app state
    let state = AppState {
        db,
        llm: Arc::new(llm),
        email_ledger,
        dm_ledger,
        launcher: Arc::new(ChromeLauncher {
            headless: config.browser_headless,
        }),
        industries: Arc::new(industries),
        runs: RunRegistry::default(),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
