use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use earn_ledger::{
    repositories::{MemoryStore, PgStore, Store},
    services,
    settings::{Backend, Settings},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::new(&args.config).context("Could not load config file.")?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        settings.postgres.url = url;
    }

    init_logging(&args.log4rs)?;
    log::info!("Starting earn ledger service.");

    let store: Arc<dyn Store> = match settings.store.backend {
        Backend::Memory => {
            log::warn!("Using the in-memory store; nothing survives a restart.");
            Arc::new(MemoryStore::new())
        }
        Backend::Postgres => {
            let conn = PgPoolOptions::new()
                .max_connections(settings.postgres.max_connections)
                .connect(&settings.postgres.url)
                .await
                .context("Could not connect to database.")?;
            let store = PgStore::new(conn);
            store.migrate().await.context("Could not run migrations.")?;
            Arc::new(store)
        }
    };

    tokio::select! {
        result = services::start_services(store, settings) => {
            result.context("Could not start services.")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down.");
        }
    }

    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
