use callbridge::config::AppConfig;
use callbridge::db;
use callbridge::recap::RecapSummarizer;
use callbridge::server::{self, AppState, BroadcastManager, SessionRegistry};
use callbridge::webhook::{CarrierClient, WebhookState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callbridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting callbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!(realtime = config.mode.realtime_enabled(), "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.datastore.max_connections)
        .connect(&config.datastore.supabase_url)
        .await?;
    db::init_db(&pool).await?;
    info!("datastore connected and migrated");

    let registry = Arc::new(SessionRegistry::new());
    let broadcast = Arc::new(BroadcastManager::new());
    let carrier = Arc::new(CarrierClient::new(&config.carrier));
    let summarizer = Arc::new(RecapSummarizer::new(&config.inference));

    let app_state = AppState {
        pool: pool.clone(),
        registry,
        broadcast,
    };
    let webhook_state = WebhookState {
        pool: pool.clone(),
        carrier,
        http: reqwest::Client::new(),
        summarizer,
    };

    let app = server::create_router(app_state, webhook_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("bridge server listening on http://{}", addr);

    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        retention_sweep_loop(sweep_pool).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bridge server shut down");
    Ok(())
}

async fn retention_sweep_loop(pool: db::DbPool) {
    let mut interval = tokio::time::interval(Duration::from_secs(6 * 60 * 60));
    loop {
        interval.tick().await;
        match callbridge::recap::sweep_expired_transcripts(&pool).await {
            Ok(count) => info!(count, "retention sweep complete"),
            Err(e) => error!(error = %e, "retention sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight sessions");
}
