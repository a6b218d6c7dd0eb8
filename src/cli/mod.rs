//! # CLI Module
//!
//! Operator command-line interface for CommonGround services.
//!
//! ## Commands
//!
//! - `serve`: run the service with request capture and document-store logging
//! - `logs`: show the most recent application or request log documents
//! - `check-env`: validate the environment and report every finding
//! - `env-example`: print a documented `.env` template
//!
//! ## Usage Example
//!
//! ```bash
//! # Start the service
//! commonground serve
//!
//! # Last 5 captured HTTP exchanges
//! commonground logs --requests --limit 5
//!
//! # Write a configuration template
//! commonground env-example > .env
//! ```

use crate::env::{
    AppConfig, generate_env_example, get_config, print_validation_results, validate_environment_report,
};
use crate::error::Result;
use crate::logging::{LogSink, init_tracing};
use crate::server::{shutdown::ShutdownCoordinator, start_server};
use crate::store::{ConnectionManager, FindOptions};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

///////////////////////////////////////////////////////////////////////////////
//****                        Private Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Parser)]
#[command(name = "commonground")]
#[command(about = "CommonGround service toolkit CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

///////////////////////////////////////////////////////////////////////////////
//****                         Private Types                             ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Subcommand)]
enum Commands {
    /// Run the service with request capture and log persistence
    #[command(name = "serve")]
    Serve,
    /// Show the most recent persisted log documents
    #[command(name = "logs")]
    Logs {
        /// Read captured HTTP exchanges instead of application logs
        #[arg(long)]
        requests: bool,
        /// Number of documents to show (at least 1)
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
        limit: u32,
    },
    /// Validate environment variables and print the results
    #[command(name = "check-env")]
    CheckEnv,
    /// Print an example environment file
    #[command(name = "env-example")]
    EnvExample,
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn parse_cli_commands() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve().await,
        Commands::Logs { requests, limit } => {
            let config = get_config();
            install_tracing(&config, None);
            show_logs(&config, requests, limit).await
        }
        Commands::CheckEnv => {
            let report = validate_environment_report();
            print_validation_results(&report);
            if report.is_err() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::EnvExample => {
            print!("{}", generate_env_example());
            Ok(())
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Functions                          ****//
///////////////////////////////////////////////////////////////////////////////

async fn serve() -> Result<()> {
    let config = get_config();

    let log_store = Arc::new(ConnectionManager::new(&config.log_store_uri, &config.log_store_db));
    log_store.initialize().await?;

    let sink = LogSink::new(log_store.clone(), Some(&config.log_collection));
    install_tracing(&config, Some(sink.clone()));
    info!(
        "Persisting logs to {} (collections: {}, {})",
        config.log_store_db,
        sink.base_collection(),
        sink.request_collection()
    );

    let capture = config.request_capture.then_some(sink);
    let result = start_server(config, capture, ShutdownCoordinator::new()).await;

    log_store.close().await;
    result
}

async fn show_logs(config: &AppConfig, requests: bool, limit: u32) -> Result<()> {
    let log_store = ConnectionManager::new(&config.log_store_uri, &config.log_store_db);
    log_store.initialize().await?;

    let collection_name = if requests {
        format!("{}{}", crate::logging::REQUEST_COLLECTION_PREFIX, config.log_collection)
    } else {
        config.log_collection.clone()
    };

    let options = FindOptions {
        limit: Some(limit),
        newest_first: true,
    };
    let collection = collection_name.clone();
    let documents = log_store
        .session(|db| async move { db.collection(&collection).find(options).await })
        .await;
    log_store.close().await;
    let documents = documents?;

    if documents.is_empty() {
        println!("No documents in {}", collection_name);
        return Ok(());
    }

    println!("\n=== {} (last {}) ===", collection_name, documents.len());
    // oldest first reads naturally
    for document in documents.iter().rev() {
        println!("{}", format_document(document, requests));
    }
    Ok(())
}

fn install_tracing(config: &AppConfig, sink: Option<LogSink>) {
    if let Err(e) = init_tracing(&config.log_level, sink) {
        eprintln!("Tracing already initialized: {}", e);
    }
}

/// One display line for a stored log or request document
fn format_document(document: &Value, request: bool) -> String {
    let text = |key: &str| document.get(key).and_then(Value::as_str).unwrap_or("-").to_string();

    if request {
        let status = document
            .get("status_code")
            .and_then(Value::as_u64)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        return format!("{:<6} | {:<50} | {}", text("method"), text("url"), status);
    }

    let location = match document.get("line").and_then(Value::as_u64) {
        Some(line) => format!("{}:{}", text("module"), line),
        None => text("module"),
    };
    format!(
        "{} | {:<5} | {:<40} | {}",
        text("timestamp"),
        text("level"),
        location,
        text("message")
    )
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
