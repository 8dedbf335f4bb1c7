use anyhow::Result;
use clap::{Parser, Subcommand};
use loan_app::config::AppConfig;
use loan_app::db::Database;
use loan_app::modules::all_modules;
use loan_app::storage::SqliteRepository;
use loan_app::{logging, Application, APP_NAME};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "loan_app")]
#[command(about = "Loan management backend server")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Migrate the schema and serve the API (default)
    Serve,
    /// Apply schema migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    let db = match Database::open(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    ) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Database unavailable, not starting: {}", e);
            return Err(e.into());
        }
    };
    let repository = Arc::new(SqliteRepository::new(db.clone()));
    let app = Arc::new(Application::new(APP_NAME, config, db, repository)?);
    let modules = all_modules();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            let report = app.table_migration(&modules).await?;
            info!(
                added = report.foreign_keys_added.len(),
                present = report.foreign_keys_present.len(),
                "Migration finished"
            );
        }
        Commands::Serve => {
            app.init().await;
            app.table_migration(&modules).await?;
            app.load_caches().await?;
            app.register_all_controller_routes(&modules).await?;

            let mut server = {
                let app = app.clone();
                tokio::spawn(async move { app.start_server().await })
            };

            tokio::select! {
                result = &mut server => {
                    // Stopped without a signal: bind failure or serve error
                    result??;
                }
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                    let outcome = app.stop_server().await;
                    info!(?outcome, "Server stopped");
                    server.await??;
                }
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
