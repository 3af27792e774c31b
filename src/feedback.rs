// src/feedback.rs

use crate::constants::SOURCE_TYPE_ADAPTED_LESSON;
use crate::error::{EngineError, Result};
use crate::generator::Generated;
use crate::models::{Actor, CorrectionType, Role, TrainingDataLog};
use crate::repository;
use crate::store::Store;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SftSample {
    pub log_id: String,
    pub input: Value,
    pub output: Value,
}

/// Preference pair: the human correction is preferred over the model output.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DpoSample {
    pub log_id: String,
    pub input: Value,
    pub chosen: Value,
    pub rejected: Value,
    pub correction_type: Option<CorrectionType>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    pub batch_id: String,
    pub sft: Vec<SftSample>,
    pub dpo: Vec<DpoSample>,
    /// Unprocessed logs neither accepted nor corrected; left unmarked
    pub skipped: usize,
    pub marked: usize,
    /// Logs included in `sft` and `dpo`, marked processed on commit
    #[serde(skip)]
    pub log_ids: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrainingStats {
    pub total_logs: u64,
    pub with_corrections: u64,
    pub accepted_without_changes: u64,
    pub unprocessed: u64,
    pub by_correction_type: BTreeMap<String, u64>,
}

// --- Corrections ---

/// Appends a correction for one block. The live adaptation is left untouched.
#[allow(clippy::too_many_arguments)]
pub fn record_correction(
    conn: &Connection,
    actor: &Actor,
    adapted_lesson_id: &str,
    block_id: &str,
    correction_text: &str,
    correction_type: CorrectionType,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TrainingDataLog> {
    if actor.role == Role::Student {
        return Err(EngineError::validation(
            "role",
            "students cannot record corrections",
        ));
    }
    if correction_text.trim().is_empty() {
        return Err(EngineError::validation("correction_text", "must not be empty"));
    }

    let adapted = repository::get_adaptation(conn, adapted_lesson_id)?
        .ok_or_else(|| EngineError::not_found("AdaptedLesson", adapted_lesson_id))?;
    let block = adapted
        .find_block(block_id)
        .ok_or_else(|| EngineError::not_found("ContentBlock", block_id))?;

    let entry = TrainingDataLog {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: adapted.id.clone(),
        source_type: SOURCE_TYPE_ADAPTED_LESSON.to_string(),
        block_id: Some(block.id.clone()),
        model_name: adapted
            .ai_model_used
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        input_context: json!({
            "lesson_id": adapted.lesson_id,
            "student_id": adapted.student_id,
            "lesson_version": adapted.lesson_version,
            "profile_version": adapted.profile_version,
            "adaptation_style": adapted.adaptation_style,
        }),
        model_output: serde_json::to_value(block)?,
        human_correction: Some(json!({
            "type": block.block_type,
            "content": correction_text,
        })),
        was_accepted: false,
        corrected_by_user_id: Some(actor.user_id.clone()),
        correction_type: Some(correction_type),
        correction_notes: notes.map(str::to_string),
        is_processed: false,
        processed_at: None,
        training_batch_id: None,
        created_at: now,
    };
    repository::insert_training_log(conn, &entry)?;

    info!(
        "[Feedback] {} correction on {}#{} by {}",
        correction_type, adapted.id, block_id, actor.user_id
    );
    Ok(entry)
}

/// Accepted-output sample written alongside every successful generation.
pub fn log_generation(
    conn: &Connection,
    adapted_lesson_id: &str,
    generated: &Generated,
    now: DateTime<Utc>,
) -> Result<TrainingDataLog> {
    let entry = TrainingDataLog {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: adapted_lesson_id.to_string(),
        source_type: SOURCE_TYPE_ADAPTED_LESSON.to_string(),
        block_id: None,
        model_name: generated.model_name.clone(),
        input_context: serde_json::to_value(&generated.request)?,
        model_output: json!({
            "adaptation_style": generated.adaptation_style,
            "blocks": generated.report.blocks,
        }),
        human_correction: None,
        was_accepted: true,
        corrected_by_user_id: None,
        correction_type: None,
        correction_notes: None,
        is_processed: false,
        processed_at: None,
        training_batch_id: None,
        created_at: now,
    };
    repository::insert_training_log(conn, &entry)?;
    debug!("[Feedback] Logged accepted generation for {}", adapted_lesson_id);
    Ok(entry)
}

// --- Training Export ---

/// Splits unprocessed logs into fine-tuning and preference samples. Nothing
/// is marked; see `commit_training_batch`.
pub fn collect_training_batch(conn: &Connection, limit: usize) -> Result<TrainingBatch> {
    if limit == 0 {
        return Err(EngineError::validation("limit", "must be positive"));
    }

    let logs = repository::list_unprocessed_training_logs(conn, limit)?;
    let mut batch = TrainingBatch {
        batch_id: uuid::Uuid::new_v4().to_string(),
        sft: Vec::new(),
        dpo: Vec::new(),
        skipped: 0,
        marked: 0,
        log_ids: Vec::new(),
    };

    for log in logs {
        match &log.human_correction {
            Some(correction) => {
                batch.dpo.push(DpoSample {
                    log_id: log.id.clone(),
                    input: log.input_context.clone(),
                    chosen: correction.clone(),
                    rejected: log.model_output.clone(),
                    correction_type: log.correction_type,
                });
                batch.log_ids.push(log.id);
            }
            None if log.was_accepted => {
                batch.sft.push(SftSample {
                    log_id: log.id.clone(),
                    input: log.input_context.clone(),
                    output: log.model_output.clone(),
                });
                batch.log_ids.push(log.id);
            }
            None => batch.skipped += 1,
        }
    }
    Ok(batch)
}

/// Marks the batch's logs processed under its batch id.
pub fn commit_training_batch(
    conn: &Connection,
    batch: &mut TrainingBatch,
    now: DateTime<Utc>,
) -> Result<usize> {
    batch.marked =
        repository::mark_training_logs_processed(conn, &batch.log_ids, &batch.batch_id, now)?;
    if batch.marked < batch.log_ids.len() {
        warn!(
            "[Feedback] Batch {}: {} of {} logs were already processed elsewhere",
            batch.batch_id,
            batch.log_ids.len() - batch.marked,
            batch.log_ids.len()
        );
    }
    info!(
        "[Feedback] Training batch {}: {} SFT, {} DPO, {} skipped",
        batch.batch_id,
        batch.sft.len(),
        batch.dpo.len(),
        batch.skipped
    );
    Ok(batch.marked)
}

/// Collects and commits in one step, for callers with nothing to write.
pub fn prepare_training_batch(
    conn: &Connection,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<TrainingBatch> {
    let mut batch = collect_training_batch(conn, limit)?;
    commit_training_batch(conn, &mut batch, now)?;
    Ok(batch)
}

/// Hands a collected batch to `write` and marks it processed only once the
/// write succeeded. A failed write leaves every log available to the next export.
pub fn export_training_batch<F>(store: &Store, limit: usize, write: F) -> Result<TrainingBatch>
where
    F: FnOnce(&TrainingBatch) -> Result<()>,
{
    let mut batch = store.with_conn(|conn| collect_training_batch(conn, limit))?;
    write(&batch)?;
    store.with_conn(|conn| commit_training_batch(conn, &mut batch, Utc::now()))?;
    Ok(batch)
}

pub fn training_stats(conn: &Connection) -> Result<TrainingStats> {
    let (total_logs, with_corrections, accepted_without_changes, unprocessed, by_correction_type) =
        repository::training_counts(conn)?;
    Ok(TrainingStats {
        total_logs,
        with_corrections,
        accepted_without_changes,
        unprocessed,
        by_correction_type,
    })
}
