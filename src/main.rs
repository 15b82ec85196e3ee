use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinyopds::config::{Config, ConfigError};
use tinyopds::ingest::{scanner, watcher};
use tinyopds::state::AppState;
use tinyopds::{build_router, db, server_stats};

#[derive(Parser)]
#[command(name = "tinyopds", version, about = "Tiny OPDS catalog server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a one-shot library scan and exit
    #[arg(long)]
    scan: bool,

    /// Remove books whose files are gone from disk, then exit
    #[arg(long)]
    purge_missing: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config.library.path.is_dir() {
        tracing::error!(
            "{}",
            ConfigError::LibraryPath(config.library.path.clone())
        );
        std::process::exit(1);
    }

    // Initialize database; the file name is derived from the library root
    // so every library keeps its own catalog.
    let url = db::database_url(&config.database, &config.library.path);
    let pool = db::create_pool(&url).await.unwrap_or_else(|e| {
        tracing::error!("Failed to initialize database: {e}");
        std::process::exit(1);
    });
    tracing::info!("Database initialized: {url}");

    if let Err(e) = db::queries::genres::seed_embedded(&pool).await {
        tracing::error!("Failed to seed genre taxonomy: {e}");
        std::process::exit(1);
    }

    let state = AppState::new(config, pool);

    if let Err(e) = state.aliases.seed(&state.db).await {
        tracing::warn!("Failed to seed alias table: {e}");
    }
    tracing::info!("Author aliases loaded: {}", state.aliases.len());

    // One-shot scan mode
    if cli.scan {
        tracing::info!("Running one-shot scan...");
        match scanner::run_scan(&state).await {
            Ok(stats) => {
                tracing::info!(
                    "Scan finished: found={}, skipped={}, invalid={}, duplicates={}, replaced={}, errors={}",
                    stats.books_found,
                    stats.skipped,
                    stats.invalid,
                    stats.duplicates,
                    stats.replaced,
                    stats.errors,
                );
            }
            Err(e) => {
                tracing::error!("Scan failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Remove-missing sweep mode
    if cli.purge_missing {
        match scanner::remove_missing(&state).await {
            Ok(removed) => tracing::info!("Removed {removed} books with missing files"),
            Err(e) => {
                tracing::error!("Sweep failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Server mode
    if let Err(e) = state
        .stats
        .warm_up(
            &state.db,
            &state.new_books_cutoff(),
            state.config.opds.sort_order,
        )
        .await
    {
        tracing::warn!("Statistics warm-up failed: {e}");
    }

    let addr = SocketAddr::new(
        state.config.server.host.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid host '{}', falling back to 0.0.0.0",
                state.config.server.host
            );
            "0.0.0.0".parse().unwrap()
        }),
        state.config.server.port,
    );

    tracing::info!("tinyopds v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Library root: {}", state.config.library.path.display());
    tracing::info!("Listening on {addr}{}", state.config.route_prefix());

    // Background tasks: initial scan, filesystem watcher, periodic stats.
    {
        let mut progress = state.scanner.subscribe();
        tokio::spawn(async move {
            while let Ok(p) = progress.recv().await {
                tracing::info!(
                    "Scan progress: {} found, {} skipped, {} invalid, {} duplicates ({:.0} books/s)",
                    p.books_found,
                    p.skipped,
                    p.invalid,
                    p.duplicates,
                    p.rate,
                );
            }
        });
    }
    {
        let scan_state = state.clone();
        tokio::spawn(async move {
            match scanner::run_scan(&scan_state).await {
                Ok(stats) => tracing::info!(
                    "Initial scan finished: found={}, skipped={}, duplicates={}",
                    stats.books_found,
                    stats.skipped,
                    stats.duplicates
                ),
                Err(e) => tracing::warn!("Initial scan failed: {e}"),
            }
        });
    }
    {
        let watch_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher::run(watch_state).await {
                tracing::error!("Watcher failed: {e}");
            }
        });
    }
    tokio::spawn(server_stats::emit_periodic(
        state.server_stats.clone(),
        std::time::Duration::from_secs(300),
    ));

    let app = build_router(state.clone());

    // A taken port must not crash anything beyond this process: report it
    // and exit cleanly.
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone()));

    if let Err(e) = serve.await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Wait for ctrl-c, then stop the background tasks so the listener can
/// drain and close.
async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown requested");
    state.scanner.request_stop();
    state.watcher.request_stop();
}
