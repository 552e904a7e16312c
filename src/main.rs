mod config;
mod extract;
mod image_probe;
mod inference;
mod parser;
mod receipt_db;

use config::{Config, ModelBackend};
use inference::InferenceClient;
use receipt_db::{ReceiptStore, STATUS_PENDING, StoredReceipt};
use std::path::Path;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = ".config/receipt_extract.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let config_path = std::env::var("RECEIPT_EXTRACT_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("ingest") if args.len() >= 2 => {
            let cfg = Config::load(&config_path)?;
            let db = ReceiptStore::new(&cfg.db_path)?;
            ingest(&db, &args[1..])?;
        }
        Some("process") => {
            let cfg = Config::load(&config_path)?;
            let db = ReceiptStore::new(&cfg.db_path)?;
            let model = InferenceClient::new(&cfg.model)?;

            if cfg.model.backend == ModelBackend::Local && !model.check_health().await {
                return Err(format!(
                    "Model server is not running at {}",
                    cfg.model.local.base_url
                )
                .into());
            }

            extract::run_extraction(&db, &model).await?;
        }
        Some("image") if args.len() == 2 => {
            let cfg = Config::load(&config_path)?;
            let model = InferenceClient::new(&cfg.model)?;
            extract::process_single_image(Path::new(&args[1]), &model).await?;
        }
        Some("parse") if args.len() == 2 => {
            let parsed = extract::parse_raw_file(Path::new(&args[1]))?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Some("stats") => {
            let cfg = Config::load(&config_path)?;
            let db = ReceiptStore::new(&cfg.db_path)?;
            let (total, extracted, pending, failed) = db.get_counts()?;
            info!(total, extracted, pending, failed, "Database statistics");
        }
        _ => {
            eprintln!("Usage: receipt_extract <command>");
            eprintln!("  ingest <image>...   store receipt images for extraction");
            eprintln!("  process             run extraction over pending receipts");
            eprintln!("  image <path>        extract one image and print the result");
            eprintln!("  parse <path>        parse a raw model dump, no model call");
            eprintln!("  stats               print store counts");
        }
    }

    Ok(())
}

/// Read image files from disk and store them as pending receipts.
fn ingest(db: &ReceiptStore, paths: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut stored = 0;
    for path in paths {
        let image_data = std::fs::read(path)?;
        let uid = ReceiptStore::generate_uid(path, &image_data);

        let receipt = StoredReceipt {
            uid: uid.clone(),
            source: path.clone(),
            image_data,
            status: STATUS_PENDING.to_string(),
            raw_output: None,
            parsed_json: None,
        };

        let inserted = db.insert_receipt(&receipt)?;
        if inserted {
            stored += 1;
        }
        info!(uid = %uid, path = %path, new = inserted, "STORED");
    }

    let (total, _, pending, _) = db.get_counts()?;
    info!(stored, total, pending, "Ingest complete");
    Ok(())
}
