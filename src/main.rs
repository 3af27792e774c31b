// src/main.rs

//! Operator tooling for the lesson adaptation store.

use clap::{Parser, Subcommand};
use lesson_adapt::constants::DEFAULT_TRAINING_BATCH_LIMIT;
use lesson_adapt::{feedback, repository, EngineConfig, EngineError, Store};
use log::{error, info};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lesson-adapt")]
#[command(version, about = "Maintenance commands for the lesson adaptation store")]
struct Cli {
    /// JSON file overriding engine defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and seed the assessment question bank
    Init {
        #[arg(long)]
        db: PathBuf,
    },
    /// Print the assessment question bank as JSON
    Questions {
        #[arg(long)]
        db: PathBuf,
    },
    /// Validate and print the effective engine configuration
    Config,
    /// Summarize collected training data
    TrainingStats {
        #[arg(long)]
        db: PathBuf,
    },
    /// Write unprocessed training data to sft.jsonl / dpo.jsonl and mark it processed
    ExportTraining {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TRAINING_BATCH_LIMIT)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli.config.as_deref(), cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[{}] {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Option<&Path>, command: Commands) -> Result<(), EngineError> {
    let config = match config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };

    match command {
        Commands::Init { db } => {
            let store = Store::open(&db)?;
            let count = store.with_conn(repository::list_questions)?.len();
            info!("Database ready at {:?} ({} assessment questions)", db, count);
        }
        Commands::Questions { db } => {
            let store = Store::open(&db)?;
            let questions = store.with_conn(repository::list_questions)?;
            println!("{}", serde_json::to_string_pretty(&questions)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::TrainingStats { db } => {
            let store = Store::open(&db)?;
            let stats = store.with_conn(feedback::training_stats)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::ExportTraining { db, out, limit } => {
            let store = Store::open(&db)?;
            fs::create_dir_all(&out).map_err(|e| io_error(&out, e))?;

            let batch = feedback::export_training_batch(&store, limit, |batch| {
                write_jsonl(&out.join("sft.jsonl"), &batch.sft)?;
                write_jsonl(&out.join("dpo.jsonl"), &batch.dpo)
            })?;
            info!(
                "Batch {} exported to {:?}: {} SFT, {} DPO ({} skipped)",
                batch.batch_id,
                out,
                batch.sft.len(),
                batch.dpo.len(),
                batch.skipped
            );
        }
    }
    Ok(())
}

fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n").map_err(|e| io_error(path, e))?;
    }
    writer.flush().map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, err: std::io::Error) -> EngineError {
    EngineError::ExternalService {
        service: "filesystem".to_string(),
        message: format!("{}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_failures_are_external_errors() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sft.jsonl");
        fs::create_dir(&target).unwrap();

        let err = write_jsonl(&target, &[1, 2, 3]).unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
        assert!(err.to_string().contains("sft.jsonl"), "got {err}");
    }

    #[test]
    fn unreadable_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(Some(&dir.path().join("missing.json")), Commands::Config).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
