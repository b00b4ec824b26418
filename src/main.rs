//! BioTensor Signal Service CLI
//!
//! Biosignal ingestion and feature extraction for BioTensor Lab.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use biotensor_signal_service::{
    config::Config,
    inference::InferenceConfig,
    pipeline::{IngestRequest, Pipeline, PredictionOutcome},
    server::{self, ServerConfig},
    store::Database,
    VERSION,
};

#[derive(Parser)]
#[command(name = "biotensor-signal")]
#[command(author = "BioTensor Lab")]
#[command(version = VERSION)]
#[command(about = "Biosignal ingestion and feature-extraction service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to bind to (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Inference service base URL (overrides config)
        #[arg(long)]
        inference_url: Option<String>,

        /// Inference service API key (overrides config)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Ingest one signal chunk
    Ingest {
        /// Patient identifier
        #[arg(long)]
        patient: String,

        /// Channel name (e.g. ecg, eeg-f3)
        #[arg(long)]
        channel: String,

        /// Sampling rate in Hz
        #[arg(long)]
        rate: f64,

        /// Chunk start time (RFC3339; defaults to now)
        #[arg(long)]
        start: Option<String>,

        /// Comma-separated sample values
        #[arg(long)]
        values: String,

        /// Database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List recent chunks for a patient/channel
    Recent {
        /// Patient identifier
        #[arg(long)]
        patient: String,

        /// Channel name
        #[arg(long)]
        channel: String,

        /// Lookback in milliseconds (default 60000)
        #[arg(long)]
        since_ms: Option<i64>,

        /// Database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Extract features from the latest window and request a prediction
    Extract {
        /// Patient identifier
        #[arg(long)]
        patient: String,

        /// Channel name
        #[arg(long)]
        channel: String,

        /// Model version tag sent to the inference service
        #[arg(long)]
        model_version: Option<String>,

        /// Database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Inference service base URL (overrides config)
        #[arg(long)]
        inference_url: Option<String>,

        /// Inference service API key (overrides config)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Show configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            db,
            inference_url,
            api_key,
        } => {
            cmd_serve(port, db, inference_url, api_key);
        }
        Commands::Ingest {
            patient,
            channel,
            rate,
            start,
            values,
            db,
        } => {
            cmd_ingest(&patient, &channel, rate, start, &values, db);
        }
        Commands::Recent {
            patient,
            channel,
            since_ms,
            db,
        } => {
            cmd_recent(&patient, &channel, since_ms, db);
        }
        Commands::Extract {
            patient,
            channel,
            model_version,
            db,
            inference_url,
            api_key,
        } => {
            cmd_extract(&patient, &channel, model_version, db, inference_url, api_key);
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

/// Load config and apply CLI overrides.
fn resolve_config(
    db: Option<PathBuf>,
    inference_url: Option<String>,
    api_key: Option<String>,
) -> Config {
    let mut config = Config::load().unwrap_or_default();
    if let Some(db) = db {
        config.database_path = db;
    }
    if let Some(url) = inference_url {
        config.inference.url = url;
    }
    if let Some(key) = api_key {
        config.inference.api_key = key;
    }
    config
}

/// Open the configured database or exit with a message.
fn open_database(config: &Config) -> Database {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create data directory: {e}");
    }

    match Database::open(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening database {:?}: {e}", config.database_path);
            std::process::exit(1);
        }
    }
}

fn inference_config(config: &Config) -> InferenceConfig {
    config.inference.to_client_config()
}

/// Build a runtime for the async commands.
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        })
}

fn cmd_serve(
    port: Option<u16>,
    db: Option<PathBuf>,
    inference_url: Option<String>,
    api_key: Option<String>,
) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = resolve_config(db, inference_url, api_key);
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create data directory: {e}");
    }

    let port = port.unwrap_or(config.server_port);
    let server_config = ServerConfig::new(
        port,
        config.database_path.clone(),
        inference_config(&config),
    );

    println!("BioTensor Signal Service v{VERSION}");
    println!("  Database: {:?}", config.database_path);
    println!("  Inference service: {}", config.inference.url);
    println!();

    let rt = runtime();

    let (addr, shutdown_tx) = match rt.block_on(server::run(server_config)) {
        Ok(handles) => handles,
        Err(e) => {
            eprintln!("Error starting server: {e}");
            std::process::exit(1);
        }
    };

    // Startup diagnostic only; the service runs fine while the inference
    // boundary is down.
    let inference = biotensor_signal_service::InferenceClient::new(inference_config(&config));
    match rt.block_on(inference.health()) {
        Ok(true) => println!("Inference service connection: OK"),
        Ok(false) => eprintln!("Warning: Inference service health check failed"),
        Err(e) => eprintln!("Warning: Could not reach inference service: {e}"),
    }

    println!("Listening on http://{addr}");
    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping server...");
    let _ = shutdown_tx.send(());
    // Give the graceful shutdown a moment to drain in-flight requests.
    thread::sleep(Duration::from_millis(200));
}

fn cmd_ingest(
    patient: &str,
    channel: &str,
    rate: f64,
    start: Option<String>,
    values: &str,
    db: Option<PathBuf>,
) {
    let t_start = match start {
        Some(s) => match DateTime::parse_from_rfc3339(&s) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                eprintln!("Error: invalid --start timestamp '{s}': {e}");
                std::process::exit(1);
            }
        },
        None => Utc::now(),
    };

    let parsed: Result<Vec<f64>, _> = values
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect();
    let values = match parsed {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: invalid --values list: {e}");
            std::process::exit(1);
        }
    };

    let config = resolve_config(db, None, None);
    let pipeline = Pipeline::new(open_database(&config), inference_config(&config));

    match pipeline.ingest(IngestRequest {
        patient_id: patient.to_string(),
        channel: channel.to_string(),
        sampling_rate_hz: rate,
        t_start,
        values,
    }) {
        Ok(chunk) => {
            println!("Ingested chunk {}", chunk.id);
            println!("  Patient: {}  Channel: {}", chunk.patient_id, chunk.channel);
            println!(
                "  {} samples at {} Hz ({:.3}s)",
                chunk.values.len(),
                chunk.sampling_rate_hz,
                chunk.duration_secs()
            );
            println!("  Span: {} .. {}", chunk.t_start.to_rfc3339(), chunk.t_end.to_rfc3339());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_recent(patient: &str, channel: &str, since_ms: Option<i64>, db: Option<PathBuf>) {
    let config = resolve_config(db, None, None);
    let pipeline = Pipeline::new(open_database(&config), inference_config(&config));

    match pipeline.recent(patient, channel, since_ms) {
        Ok(chunks) => {
            if chunks.is_empty() {
                println!("No recent chunks for {patient}/{channel}");
                return;
            }

            println!("{} chunk(s) for {patient}/{channel}:", chunks.len());
            for chunk in &chunks {
                println!(
                    "  [{}] {} samples at {} Hz, {} .. {}",
                    chunk.id,
                    chunk.values.len(),
                    chunk.sampling_rate_hz,
                    chunk.t_start.to_rfc3339(),
                    chunk.t_end.to_rfc3339()
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_extract(
    patient: &str,
    channel: &str,
    model_version: Option<String>,
    db: Option<PathBuf>,
    inference_url: Option<String>,
    api_key: Option<String>,
) {
    let config = resolve_config(db, inference_url, api_key);
    let pipeline = Pipeline::new(open_database(&config), inference_config(&config));

    let rt = runtime();
    let result = rt.block_on(pipeline.extract_and_predict(
        patient,
        channel,
        model_version.as_deref(),
    ));

    match result {
        Ok(extraction) => {
            println!(
                "Window: {} .. {}",
                extraction.window_start.to_rfc3339(),
                extraction.window_end.to_rfc3339()
            );
            println!("Features (persisted):");
            println!("  mean: {:.6}", extraction.features.mean);
            println!("  std:  {:.6}", extraction.features.std);
            println!("  rms:  {:.6}", extraction.features.rms);

            match extraction.prediction {
                PredictionOutcome::Predicted(payload) => {
                    println!("Prediction:");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .unwrap_or_else(|_| payload.to_string())
                    );
                }
                PredictionOutcome::Unavailable(e) => {
                    eprintln!("Prediction unavailable (features were persisted): {e}");
                    std::process::exit(2);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
