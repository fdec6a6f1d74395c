use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use cadmv::config::Config;
use cadmv::providers::dmv::DmvClient;
use cadmv::sync::Ingestor;
use cadmv::{api, db, logging};

/// California DMV wait time collector
#[derive(Parser, Debug)]
#[command(name = "cadmv", version, about)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "CADMV_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema
    Migrate,

    /// Fetch the current wait times once and store them
    Ingest,

    /// Fetch office metadata and insert or update every branch
    SyncBranches,

    /// Add a number of hours to every stored wait time timestamp
    ShiftTimestamps {
        /// Signed number of hours, e.g. -8
        #[arg(long, allow_negative_numbers = true)]
        hours: i64,

        /// Confirm rewriting every stored timestamp
        #[arg(long)]
        yes: bool,
    },

    /// Ingest periodically and serve the read API
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    logging::init(config.logging.json, cli.verbose);

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;

    match cli.command {
        Command::Migrate => {
            info!("Database schema is up to date");
        }
        Command::Ingest => {
            let ingestor = Ingestor::new(pool, DmvClient::from_config(&config)?);
            ingestor.run_once().await?;
        }
        Command::SyncBranches => {
            let ingestor = Ingestor::new(pool, DmvClient::from_config(&config)?);
            ingestor.sync_branches().await?;
        }
        Command::ShiftTimestamps { hours, yes } => {
            if !yes {
                error!(hours, "Refusing to rewrite every timestamp without --yes");
                return Err("shift-timestamps requires --yes".into());
            }
            let mut conn = pool.acquire().await?;
            db::wait_times::shift_timestamps(&mut conn, hours).await?;
        }
        Command::Serve => {
            let ingestor = Arc::new(Ingestor::new(
                pool.clone(),
                DmvClient::from_config(&config)?,
            ));
            tokio::spawn(ingestor.start(config.poll_interval()));

            let app = api::router(pool)
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive());

            info!(addr = %config.listen_addr, "Starting read API");
            let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
