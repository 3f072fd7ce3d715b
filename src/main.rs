use std::env;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use activity_sessions::api::{router, AppState};
use activity_sessions::config::{Cli, Command};
use activity_sessions::generator::generate_batch;
use activity_sessions::pipeline::Ingestor;
use activity_sessions::source::{read_events, DirectorySource};
use activity_sessions::warehouse::Warehouse;
use activity_sessions::extract;

/// Event-driven session API
/// Raw batches are never edited, the warehouse is only appended to
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { addr } => {
            let warehouse = Warehouse::open(&cli.warehouse)
                .with_context(|| format!("opening warehouse {}", cli.warehouse.display()))?;
            let state = AppState {
                bucket: cli.bucket,
                data_dir: cli.data_dir,
                warehouse: Arc::new(Mutex::new(warehouse)),
            };

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(%addr, "server running");
            axum::serve(listener, router(state)).await?;
        }
        Command::Ingest => {
            let warehouse = Warehouse::open(&cli.warehouse)?;
            let source = DirectorySource::new(&cli.data_dir);
            let ingestor = Ingestor::new(&cli.bucket, &source, &warehouse, &warehouse);
            let report = ingestor.ingest_new_batches()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Generate { users, start, end, seed } => {
            let seed = seed.unwrap_or_else(|| Utc::now().timestamp().unsigned_abs());
            info!(seed, "Dummy generation started");
            let batch = generate_batch(&cli.data_dir, &start, &end, users, seed)?;
            println!("{batch}");
        }
        Command::Extract { path, activity } => {
            let file = fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            let events = read_events(file, &path.display().to_string())?;
            let table = extract(&events, &activity)?;
            println!("{}", serde_json::to_string_pretty(&table.sessions)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ACTIVITY_SESSIONS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("activity_sessions=info,warn"));

    let format = env::var("ACTIVITY_SESSIONS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so command output on stdout stays machine-readable
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}
