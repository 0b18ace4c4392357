mod config;
mod constants;
mod domain;
mod logging;
mod routes;
mod scheduler;
mod services;

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::Config;
use constants::EVENT_BUFFER_SIZE;
use scheduler::Scheduler;
use services::facebook::FacebookClient;
use services::notifier::EventNotifier;
use services::{analysis, db, page_import};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub facebook: FacebookClient,
    pub scheduler: Arc<Scheduler>,
    pub notifier: EventNotifier,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init();

    let config = Config::from_env().expect("Invalid configuration");

    let pool = db::connect(&config.database_url)
        .await
        .expect("Failed to open database");

    let candidates = page_import::candidate_paths(config.page_json.as_deref());
    match page_import::import_page_credentials(&pool, &candidates).await {
        Ok(outcome) => tracing::debug!(?outcome, "Credential file import finished"),
        Err(e) => tracing::warn!(error = %e, "Credential file import failed"),
    }

    let facebook = FacebookClient::new(
        &config.graph_base,
        config.app_secret.as_deref(),
        config.publish_timeout,
    )
    .expect("Failed to build HTTP client");

    let notifier = EventNotifier::new(EVENT_BUFFER_SIZE);
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        Arc::new(facebook.clone()),
        notifier.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_task = tokio::spawn(scheduler::start_background_scheduler(
        scheduler.clone(),
        config.publish_interval,
        shutdown_rx.clone(),
    ));
    let analysis_task = tokio::spawn(analysis::start_analysis_poller(
        pool.clone(),
        facebook.clone(),
        config.analysis_interval,
        shutdown_rx,
    ));

    let port = config.port;
    let state = Arc::new(AppState {
        db: pool,
        config,
        facebook,
        scheduler,
        notifier,
    });

    let app = routes::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", addr, e));

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(scheduler_task, analysis_task);
    tracing::info!("Shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
