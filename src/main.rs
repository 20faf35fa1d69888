mod attachment;
mod campaign;
mod config;
mod contact;
mod error;
mod heuristics;
mod intake_db;
mod matcher;
mod pdf_text;
mod pipeline;
mod processing_log;
mod signature;
mod webhook;

use clap::{Parser, Subcommand};
use heuristics::DocumentType;
use intake_db::{ContactType, IntakeStore};
use pdf_text::PdfTextExtractor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "job_intake", version, about = "Inbound invoice and estimate intake")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, default_value = "config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Extract and parse a local PDF, print the result as JSON
    ParsePdf {
        file: PathBuf,
        #[arg(long = "type", default_value = "invoice")]
        document_type: DocumentType,
    },
    /// Add a customer and its contacts to the directory
    AddCustomer {
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        mobile: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Print record and log counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::Config::load_or_default(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::ParsePdf {
            file,
            document_type,
        } => parse_pdf_file(&file, document_type),
        Command::AddCustomer {
            name,
            phone,
            mobile,
            email,
        } => {
            let store = open_store(&cfg.server.db_path)?;
            let id = store.insert_customer(&name)?;
            let contacts = [
                (ContactType::Phone, phone),
                (ContactType::MobilePhone, mobile),
                (ContactType::Email, email),
            ];
            for (contact_type, value) in contacts {
                if let Some(value) = value {
                    store.add_contact(id, contact_type, &value)?;
                }
            }
            println!("{id}");
            Ok(())
        }
        Command::Stats => {
            let store = open_store(&cfg.server.db_path)?;
            let counts = store.get_counts()?;
            info!(
                customers = counts.customers,
                job_completions = counts.job_completions,
                review_requests = counts.review_requests,
                followup_campaigns = counts.followup_campaigns,
                "Database statistics"
            );
            for (status, n) in counts.logs_by_status {
                println!("{status:<10} {n}");
            }
            Ok(())
        }
    }
}

async fn serve(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.signing_key().is_none() {
        warn!(
            env = config::SIGNING_KEY_ENV,
            "No webhook signing key configured; every webhook request will be refused"
        );
    }

    let store = open_store(&cfg.server.db_path)?;
    let bind_addr = cfg.server.bind_addr.clone();
    let state = webhook::AppState {
        store: Arc::new(store),
        extractor: Arc::new(PdfTextExtractor),
        config: Arc::new(cfg),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Listening");
    axum::serve(listener, webhook::router(state)).await?;
    Ok(())
}

fn parse_pdf_file(path: &Path, document_type: DocumentType) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let doc = pdf_text::parse_pdf(&PdfTextExtractor, &bytes, document_type);
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn open_store(db_path: &str) -> Result<IntakeStore, Box<dyn std::error::Error>> {
    if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(IntakeStore::open(db_path)?)
}
