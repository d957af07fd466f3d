//! Fulfillment service entry point.

use std::sync::Arc;

use messaging::{FailedMessageStore, InMemoryFailedMessageStore, PostgresFailedMessageStore};
use server::config::{Config, LogFormat};
use server::pipeline::Pipeline;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Cancels `cancel` on the first SIGINT or SIGTERM, which stops the HTTP
/// server and every consumer and job worker holding a child token.
async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let signal_name = tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::warn!(%error, "SIGINT handler unavailable");
            }
            "SIGINT"
        }
        () = sigterm => "SIGTERM",
        () = cancel.cancelled() => return,
    };
    tracing::info!(signal = signal_name, "Shutting down fulfillment pipeline");
    cancel.cancel();
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn failed_message_store(config: &Config) -> Arc<dyn FailedMessageStore> {
    let Some(database_url) = &config.database_url else {
        tracing::info!("DATABASE_URL not set, keeping failed messages in memory");
        return Arc::new(InMemoryFailedMessageStore::new());
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresFailedMessageStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("failed messages stored in PostgreSQL");
    Arc::new(store)
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Build and start the pipeline
    let failed_messages = failed_message_store(&config).await;
    let pipeline = Pipeline::build(&config, failed_messages);
    let cancel = CancellationToken::new();
    pipeline
        .start(&cancel)
        .await
        .expect("failed to start fulfillment pipeline");
    tracing::info!(
        exchange = %config.bus.exchange,
        jobs_store = %config.jobs.connection_string,
        cache_store = %config.cache.connection_string,
        "fulfillment pipeline running"
    );

    // 4. Serve HTTP until a shutdown signal arrives
    let state = Arc::new(server::AppState::from_pipeline(&pipeline, Some(metrics_handle)));
    let app = server::create_app(state);

    let addr = config.addr();
    tracing::info!(%addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .expect("server error");

    // 5. Drain jobs and consumers
    pipeline.shutdown().await;
    tracing::info!("server shut down gracefully");
}
