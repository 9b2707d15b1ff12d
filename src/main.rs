//! Schema Tracker API
//!
//! Serves schema snapshots and diffs over HTTP. Captures are taken from the
//! configured source database; history lives in a local SQLite store.

use schema_tracker::config::{Settings, SourceConfig};
use schema_tracker::filter::TableFilter;
use schema_tracker::routes::create_router;
use schema_tracker::snapshot::SnapshotStore;
use schema_tracker::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Schema Tracker...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store = SnapshotStore::open(&settings.snapshots.store_path)?
        .with_default_list_limit(settings.snapshots.list_limit);
    info!(
        "🗄️  Snapshot store ready at {} ({} snapshots)",
        settings.snapshots.store_path.display(),
        store.count()?
    );

    let filter = TableFilter::new(&settings.snapshots.filter)?;

    let source = match &settings.source {
        Some(config) => Some(init_source_pool(config).await?),
        None => {
            warn!("⚠️  No SOURCE_DATABASE_URL or DATABASE_URL set, snapshot capture is disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(
        Arc::new(store),
        source,
        filter,
        settings.snapshots.crawl_schema.clone(),
    ));

    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("📚 API Endpoints:");
    info!("   GET  /health                             - Liveness check");
    info!("   POST /api/snapshots                      - Capture schema '{}'", settings.snapshots.crawl_schema);
    info!("   GET  /api/snapshots?limit=               - List recent snapshots");
    info!("   GET  /api/snapshots/{{id}}                 - Get a snapshot");
    info!("   GET  /api/snapshots/{{id}}/export?format=  - Export as json or markdown");
    info!("   GET  /api/diff?from=&to=                 - Diff two snapshots");
    info!("   GET  /api/diff/latest                    - Diff the two newest snapshots");
    info!("   POST /api/snapshots/prune                - Drop old snapshots");
    info!("   POST /api/snapshots/rebuild-projection   - Rebuild table/column rows");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schema_tracker=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Build the pool for the database being crawled
async fn init_source_pool(source: &SourceConfig) -> anyhow::Result<deadpool_postgres::Pool> {
    use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod};

    let mut cfg = Config::new();
    cfg.host = Some(source.host.clone());
    cfg.port = Some(source.port);
    cfg.user = Some(source.user.clone());
    cfg.password = Some(source.password.clone());
    cfg.dbname = Some(source.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(source.max_pool_size));

    let pool = if source.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;

    client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify source database connection: {}", e))?;

    info!(
        "✅ Source database {}:{}/{} reachable (TLS: {})",
        source.host, source.port, source.database, source.require_tls
    );
    Ok(pool)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
