//! WEx Backend — warehouse-space clearinghouse core.
//!
//! Boots the database, seeds the default admin, starts the background
//! scheduler, and serves the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wex_backend::api::{build_router, AppState};
use wex_backend::auth::UserStore;
use wex_backend::db::Db;
use wex_backend::geocode::GeocodeClient;
use wex_backend::jobs;
use wex_backend::llm::LlmClient;
use wex_backend::models::Config;

#[derive(Parser, Debug)]
#[command(name = "wex", about = "WEx clearinghouse backend")]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    db: Option<String>,

    /// Disable the background scheduler
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wex_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db {
        config.database_path = db_path;
    }

    info!(db = %config.database_path, "Opening database");
    let db = Db::new(&config.database_path)?;

    UserStore::new(db.clone())
        .ensure_default_admin(&config.admin_email, &config.admin_password)
        .await?;

    let llm = LlmClient::new(config.llm_api_key.clone(), config.llm_model.clone());
    if !llm.is_configured() {
        info!("LLM key not configured: feature scoring and SMS agents run on degrade paths");
    }
    let geocode = GeocodeClient::new(config.geocoding_api_key.clone());

    let state = AppState::new(
        db.clone(),
        llm,
        geocode,
        config.jwt_secret.clone(),
        config.frontend_url.clone(),
    );

    if config.scheduler_enabled && !args.no_scheduler {
        jobs::spawn_all(db.clone());
    } else {
        info!("Background scheduler disabled");
    }

    // Periodic sweep of idle phone-throttle windows
    let sms_throttle = state.sms_throttle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10 * 60));
        loop {
            ticker.tick().await;
            sms_throttle.cleanup();
        }
    });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "WEx backend listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
