//! Tandem Server - keeps a CRM and a content store in sync.
//!
//! Both stores post change events to this server as webhooks. Each event runs
//! a sync pass through the tandem-engine orchestrator; entity links are kept
//! in PostgreSQL and every applied sync is streamed to WebSocket clients.

mod adapters;
mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod service;
mod websocket;

use crate::adapters::{FsAttachments, HttpStore};
use crate::config::Config;
use crate::db::PgLinkStore;
use crate::service::SyncService;
use crate::websocket::{ConnectionManager, WsSink};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tandem_engine::{AttachmentTypes, Capabilities, MappingConfig, Orchestrator, Side};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The engine as deployed: both stores over HTTP, links in PostgreSQL.
pub type Service = SyncService<HttpStore, HttpStore, PgLinkStore>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sync: Service,
    pub conn_manager: Arc<ConnectionManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tandem_server=debug,tandem_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tandem Server on {}:{}", config.host, config.port);

    let mapping = MappingConfig::from_json(&std::fs::read_to_string(&config.mapping_config)?)?;
    tracing::info!(
        path = %config.mapping_config.display(),
        mapped_types = mapping.mapped_types.len(),
        "Loaded mapping configuration"
    );

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let runtime = tokio::runtime::Handle::current();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let crm = HttpStore::new(Side::Crm, &config.crm_base_url, client.clone(), runtime.clone())?;
    let content = HttpStore::new(
        Side::Content,
        &config.content_base_url,
        client.clone(),
        runtime.clone(),
    )?;
    let links = PgLinkStore::new(pool, runtime.clone());
    let attachments = FsAttachments::open(&config.attachment_dir)?.with_remote(client, runtime);

    let conn_manager = ConnectionManager::new_shared();
    let capabilities = Capabilities::new()
        .with_provider(AttachmentTypes::new(config.attachment_types.clone()))
        .with_sink(WsSink::new(Arc::clone(&conn_manager)));

    let engine = Orchestrator::new(mapping, crm, content, links)?
        .with_attachments(attachments)
        .with_capabilities(capabilities)
        .with_retire_mode(config.retire_mode);

    let state = AppState {
        config: Arc::new(config.clone()),
        sync: SyncService::new(engine),
        conn_manager,
    };

    let app = Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
