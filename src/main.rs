use anyhow::Result;
use axum::Router;
use ipfs_gateway::{
    commands::{self, Outcome},
    config::{self, AppConfig, Command},
    db,
    handlers::content_handlers::GatewayState,
    routes,
    services::storage_service::StorageService,
};
use std::{io::ErrorKind, path::Path, process::ExitCode, sync::Arc, time::Duration};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup (stderr, so CLI output stays clean) ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + migrate flag + command ---
    let (cfg, migrate, command) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting ipfs-gateway with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(ExitCode::SUCCESS); // exit after migration
    }

    // --- Initialize core service ---
    let storage = StorageService::new(Arc::new(pool), cfg.storage_dir.clone())
        .with_public_gateway(cfg.public_gateway.clone());

    if command != Command::Serve {
        let mut stdout = std::io::stdout();
        return match commands::run(command, &storage, &cfg, &mut stdout).await? {
            Outcome::Done => Ok(ExitCode::SUCCESS),
            Outcome::NotFound => Ok(ExitCode::FAILURE),
        };
    }

    serve(cfg, storage).await?;
    Ok(ExitCode::SUCCESS)
}

async fn serve(cfg: AppConfig, storage: StorageService) -> Result<()> {
    if cfg.gc_interval_secs > 0 {
        spawn_gc_loop(
            storage.clone(),
            Duration::from_secs(cfg.gc_interval_secs),
            cfg.gc_max_age(),
        );
    }

    // --- Build router ---
    let state = GatewayState {
        storage,
        gc_max_age: cfg.gc_max_age(),
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Gateway listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically collect unpinned content older than `max_age`.
fn spawn_gc_loop(storage: StorageService, period: Duration, max_age: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match storage.gc(max_age).await {
                Ok(report) => tracing::info!(
                    removed = report.removed.len(),
                    failed = report.failed.len(),
                    "background gc finished"
                ),
                Err(err) => tracing::warn!(error = %err, "background gc failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
