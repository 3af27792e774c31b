// src/repository.rs

use crate::error::Result;
use crate::models::{
    AdaptationRevision, AdaptedLesson, Assessment, ContentBlock, Lesson, LessonProgress,
    NeuroProfile, Question, StudentProgress, TrainingDataLog, UnknownVariant,
};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::str::FromStr;

// --- Column Helpers ---

pub fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn enum_col<T: FromStr<Err = UnknownVariant>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_enum_col<T: FromStr<Err = UnknownVariant>>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => T::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn u64_col(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    u64::try_from(v).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, v))
}

// --- Assessment Questions ---

pub fn insert_question(conn: &Connection, q: &Question) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO assessment_questions
            (id, text, question_type, category, options, scale_min, scale_max, is_required, ord, dimension)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            q.id,
            q.text,
            q.question_type.as_str(),
            q.category.as_str(),
            serde_json::to_string(&q.options)?,
            q.scale_min,
            q.scale_max,
            q.is_required,
            q.order,
            q.dimension
        ],
    )?;
    Ok(())
}

pub fn list_questions(conn: &Connection) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, question_type, category, options, scale_min, scale_max, is_required, ord, dimension
         FROM assessment_questions
         ORDER BY ord ASC, id ASC",
    )?;
    let questions = stmt
        .query_map([], |row| {
            Ok(Question {
                id: row.get(0)?,
                text: row.get(1)?,
                question_type: enum_col(row, 2)?,
                category: enum_col(row, 3)?,
                options: json_col(row, 4)?,
                scale_min: row.get(5)?,
                scale_max: row.get(6)?,
                is_required: row.get(7)?,
                order: row.get(8)?,
                dimension: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<Question>>>()?;
    Ok(questions)
}

// --- Assessments ---

pub fn find_assessment(conn: &Connection, student_id: &str) -> Result<Option<Assessment>> {
    let assessment = conn
        .query_row(
            "SELECT id, student_id, status, answers, current_question_index, total_questions,
                    started_at, completed_at, generated_profile_id, created_at, updated_at
             FROM assessments WHERE student_id = ?",
            [student_id],
            |row| {
                Ok(Assessment {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    status: enum_col(row, 2)?,
                    answers: json_col(row, 3)?,
                    current_question_index: row.get(4)?,
                    total_questions: row.get(5)?,
                    started_at: opt_ts_col(row, 6)?,
                    completed_at: opt_ts_col(row, 7)?,
                    generated_profile_id: row.get(8)?,
                    created_at: ts_col(row, 9)?,
                    updated_at: ts_col(row, 10)?,
                })
            },
        )
        .optional()?;
    Ok(assessment)
}

pub fn save_assessment(conn: &Connection, a: &Assessment) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO assessments
            (id, student_id, status, answers, current_question_index, total_questions,
             started_at, completed_at, generated_profile_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            a.id,
            a.student_id,
            a.status.as_str(),
            serde_json::to_string(&a.answers)?,
            a.current_question_index,
            a.total_questions,
            a.started_at.map(millis),
            a.completed_at.map(millis),
            a.generated_profile_id,
            millis(a.created_at),
            millis(a.updated_at)
        ],
    )?;
    Ok(())
}

/// Moves an open assessment to PROCESSING with its merged answers. Returns
/// false when another submit already took it out of NOT_STARTED/IN_PROGRESS.
pub fn begin_assessment_processing(conn: &Connection, a: &Assessment) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE assessments
         SET status = 'processing', answers = ?, started_at = ?, updated_at = ?
         WHERE student_id = ? AND status IN ('not_started', 'in_progress')",
        params![
            serde_json::to_string(&a.answers)?,
            a.started_at.map(millis),
            millis(a.updated_at),
            a.student_id
        ],
    )?;
    Ok(changed == 1)
}

// --- Neuro Profiles ---

const PROFILE_COLUMNS: &str = "id, student_id, version, learning_style, reading_level, complexity_tolerance,
     attention_span_minutes, sensory_triggers, interests, confidence_scores, generated_profile,
     assessment_id, created_at";

fn row_to_profile(row: &Row) -> rusqlite::Result<NeuroProfile> {
    Ok(NeuroProfile {
        id: row.get(0)?,
        student_id: row.get(1)?,
        version: row.get(2)?,
        learning_style: enum_col(row, 3)?,
        reading_level: enum_col(row, 4)?,
        complexity_tolerance: enum_col(row, 5)?,
        attention_span_minutes: row.get(6)?,
        sensory_triggers: json_col(row, 7)?,
        interests: json_col(row, 8)?,
        confidence_scores: json_col(row, 9)?,
        generated_profile: row.get(10)?,
        assessment_id: row.get(11)?,
        created_at: ts_col(row, 12)?,
    })
}

/// The current profile is the highest version.
pub fn current_profile(conn: &Connection, student_id: &str) -> Result<Option<NeuroProfile>> {
    let sql = format!(
        "SELECT {} FROM neuro_profiles WHERE student_id = ? ORDER BY version DESC LIMIT 1",
        PROFILE_COLUMNS
    );
    let profile = conn
        .query_row(&sql, [student_id], row_to_profile)
        .optional()?;
    Ok(profile)
}

pub fn profile_history(conn: &Connection, student_id: &str) -> Result<Vec<NeuroProfile>> {
    let sql = format!(
        "SELECT {} FROM neuro_profiles WHERE student_id = ? ORDER BY version ASC",
        PROFILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let profiles = stmt
        .query_map([student_id], row_to_profile)?
        .collect::<rusqlite::Result<Vec<NeuroProfile>>>()?;
    Ok(profiles)
}

pub fn latest_profile_version(conn: &Connection, student_id: &str) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM neuro_profiles WHERE student_id = ?",
        [student_id],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Inserts a new profile version. Prior versions are never touched.
pub fn insert_profile(conn: &Connection, p: &NeuroProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO neuro_profiles
            (id, student_id, version, learning_style, reading_level, complexity_tolerance,
             attention_span_minutes, sensory_triggers, interests, confidence_scores,
             generated_profile, assessment_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            p.id,
            p.student_id,
            p.version,
            p.learning_style.as_str(),
            p.reading_level.as_str(),
            p.complexity_tolerance.as_str(),
            p.attention_span_minutes,
            serde_json::to_string(&p.sensory_triggers)?,
            serde_json::to_string(&p.interests)?,
            serde_json::to_string(&p.confidence_scores)?,
            p.generated_profile,
            p.assessment_id,
            millis(p.created_at)
        ],
    )?;
    debug!(
        "[DB] Inserted profile v{} for student {}",
        p.version, p.student_id
    );
    Ok(())
}

// --- Lessons ---

pub fn insert_lesson(conn: &Connection, l: &Lesson) -> Result<()> {
    conn.execute(
        "INSERT INTO lessons
            (id, teacher_id, school_id, title, description, subject, original_text_content,
             media_url, status, content_version, adaptation_count, created_at, updated_at, published_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            l.id,
            l.teacher_id,
            l.school_id,
            l.title,
            l.description,
            l.subject,
            l.original_text_content,
            l.media_url,
            l.status.as_str(),
            l.content_version,
            l.adaptation_count,
            millis(l.created_at),
            millis(l.updated_at),
            l.published_at.map(millis)
        ],
    )?;
    Ok(())
}

pub fn get_lesson(conn: &Connection, lesson_id: &str) -> Result<Option<Lesson>> {
    let lesson = conn
        .query_row(
            "SELECT id, teacher_id, school_id, title, description, subject, original_text_content,
                    media_url, status, content_version, adaptation_count, created_at, updated_at, published_at
             FROM lessons WHERE id = ?",
            [lesson_id],
            |row| {
                Ok(Lesson {
                    id: row.get(0)?,
                    teacher_id: row.get(1)?,
                    school_id: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    subject: row.get(5)?,
                    original_text_content: row.get(6)?,
                    media_url: row.get(7)?,
                    status: enum_col(row, 8)?,
                    content_version: row.get(9)?,
                    adaptation_count: row.get(10)?,
                    created_at: ts_col(row, 11)?,
                    updated_at: ts_col(row, 12)?,
                    published_at: opt_ts_col(row, 13)?,
                })
            },
        )
        .optional()?;
    Ok(lesson)
}

pub fn update_lesson(conn: &Connection, l: &Lesson) -> Result<()> {
    conn.execute(
        "UPDATE lessons SET title = ?, description = ?, subject = ?, original_text_content = ?,
                media_url = ?, status = ?, content_version = ?, updated_at = ?, published_at = ?
         WHERE id = ?",
        params![
            l.title,
            l.description,
            l.subject,
            l.original_text_content,
            l.media_url,
            l.status.as_str(),
            l.content_version,
            millis(l.updated_at),
            l.published_at.map(millis),
            l.id
        ],
    )?;
    Ok(())
}

pub fn increment_adaptation_count(conn: &Connection, lesson_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE lessons SET adaptation_count = adaptation_count + 1 WHERE id = ?",
        [lesson_id],
    )?;
    Ok(())
}

// --- Adapted Lessons ---

const ADAPTATION_COLUMNS: &str = "id, lesson_id, student_id, lesson_title, adaptation_style, status,
     content_blocks, lesson_version, profile_version, attempt, ai_model_used,
     generation_duration_ms, failure_reason, claimed_at, generated_at, view_count,
     created_at, updated_at";

fn row_to_adaptation(row: &Row) -> rusqlite::Result<AdaptedLesson> {
    Ok(AdaptedLesson {
        id: row.get(0)?,
        lesson_id: row.get(1)?,
        student_id: row.get(2)?,
        lesson_title: row.get(3)?,
        adaptation_style: row.get(4)?,
        status: enum_col(row, 5)?,
        content_blocks: json_col(row, 6)?,
        lesson_version: row.get(7)?,
        profile_version: row.get(8)?,
        attempt: row.get(9)?,
        ai_model_used: row.get(10)?,
        generation_duration_ms: row
            .get::<_, Option<i64>>(11)?
            .map(|v| v.max(0) as u64),
        failure_reason: row.get(12)?,
        claimed_at: opt_ts_col(row, 13)?,
        generated_at: opt_ts_col(row, 14)?,
        view_count: row.get(15)?,
        created_at: ts_col(row, 16)?,
        updated_at: ts_col(row, 17)?,
    })
}

pub fn find_adaptation(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
) -> Result<Option<AdaptedLesson>> {
    let sql = format!(
        "SELECT {} FROM adapted_lessons WHERE lesson_id = ? AND student_id = ?",
        ADAPTATION_COLUMNS
    );
    let adapted = conn
        .query_row(&sql, params![lesson_id, student_id], row_to_adaptation)
        .optional()?;
    Ok(adapted)
}

pub fn get_adaptation(conn: &Connection, adapted_lesson_id: &str) -> Result<Option<AdaptedLesson>> {
    let sql = format!(
        "SELECT {} FROM adapted_lessons WHERE id = ?",
        ADAPTATION_COLUMNS
    );
    let adapted = conn
        .query_row(&sql, [adapted_lesson_id], row_to_adaptation)
        .optional()?;
    Ok(adapted)
}

/// Creates the PENDING row for a key. Returns false when another caller got there first.
pub fn insert_pending_adaptation(conn: &Connection, a: &AdaptedLesson) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO adapted_lessons
            (id, lesson_id, student_id, lesson_title, status, content_blocks, lesson_version,
             profile_version, attempt, view_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'pending', '[]', ?, ?, 0, 0, ?, ?)",
        params![
            a.id,
            a.lesson_id,
            a.student_id,
            a.lesson_title,
            a.lesson_version,
            a.profile_version,
            millis(a.created_at),
            millis(a.updated_at)
        ],
    )?;
    Ok(changed == 1)
}

/// Atomic PENDING/FAILED/stale-GENERATING -> GENERATING transition.
///
/// Returns the new attempt number if this caller won the claim.
pub fn try_claim_adaptation(
    conn: &Connection,
    adapted_lesson_id: &str,
    lesson_title: &str,
    lesson_version: u32,
    profile_version: u32,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<Option<u32>> {
    let attempt = conn
        .query_row(
            "UPDATE adapted_lessons
             SET status = 'generating', attempt = attempt + 1, claimed_at = ?, lesson_title = ?,
                 lesson_version = ?, profile_version = ?, failure_reason = NULL, updated_at = ?
             WHERE id = ?
               AND (status IN ('pending', 'failed')
                    OR (status = 'generating' AND claimed_at < ?))
             RETURNING attempt",
            params![
                millis(now),
                lesson_title,
                lesson_version,
                profile_version,
                millis(now),
                adapted_lesson_id,
                millis(stale_before)
            ],
            |row| row.get::<_, u32>(0),
        )
        .optional()?;
    Ok(attempt)
}

/// Writes the generated blocks and flips the row to READY in one statement.
/// Applies only while `attempt` still owns the claim.
#[allow(clippy::too_many_arguments)]
pub fn complete_adaptation(
    conn: &Connection,
    adapted_lesson_id: &str,
    attempt: u32,
    blocks: &[ContentBlock],
    adaptation_style: &str,
    ai_model_used: &str,
    generation_duration_ms: u64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE adapted_lessons
         SET status = 'ready', content_blocks = ?, adaptation_style = ?, ai_model_used = ?,
             generation_duration_ms = ?, generated_at = ?, failure_reason = NULL, updated_at = ?
         WHERE id = ? AND status = 'generating' AND attempt = ?",
        params![
            serde_json::to_string(blocks)?,
            adaptation_style,
            ai_model_used,
            generation_duration_ms as i64,
            millis(now),
            millis(now),
            adapted_lesson_id,
            attempt
        ],
    )?;
    Ok(changed == 1)
}

pub fn fail_adaptation(
    conn: &Connection,
    adapted_lesson_id: &str,
    attempt: u32,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE adapted_lessons
         SET status = 'failed', failure_reason = ?, updated_at = ?
         WHERE id = ? AND status = 'generating' AND attempt = ?",
        params![reason, millis(now), adapted_lesson_id, attempt],
    )?;
    Ok(changed == 1)
}

/// Archives a READY row into the revision log and resets it to PENDING for
/// the new lesson/profile versions.
pub fn supersede_adaptation(
    conn: &Connection,
    current: &AdaptedLesson,
    lesson_version: u32,
    profile_version: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE adapted_lessons
         SET status = 'pending', content_blocks = '[]', lesson_version = ?, profile_version = ?,
             updated_at = ?
         WHERE id = ? AND status = 'ready' AND attempt = ?",
        params![
            lesson_version,
            profile_version,
            millis(now),
            current.id,
            current.attempt
        ],
    )?;
    if changed == 1 {
        tx.execute(
            "INSERT INTO adapted_lesson_revisions
                (adapted_lesson_id, attempt, lesson_version, profile_version, adaptation_style,
                 content_blocks, ai_model_used, generated_at, superseded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                current.id,
                current.attempt,
                current.lesson_version,
                current.profile_version,
                current.adaptation_style,
                serde_json::to_string(&current.content_blocks)?,
                current.ai_model_used,
                current.generated_at.map(millis),
                millis(now)
            ],
        )?;
    }
    tx.commit()?;
    Ok(changed == 1)
}

pub fn list_adaptation_revisions(
    conn: &Connection,
    adapted_lesson_id: &str,
) -> Result<Vec<AdaptationRevision>> {
    let mut stmt = conn.prepare(
        "SELECT adapted_lesson_id, attempt, lesson_version, profile_version, adaptation_style,
                content_blocks, ai_model_used, generated_at, superseded_at
         FROM adapted_lesson_revisions WHERE adapted_lesson_id = ? ORDER BY id ASC",
    )?;
    let revisions = stmt
        .query_map([adapted_lesson_id], |row| {
            Ok(AdaptationRevision {
                adapted_lesson_id: row.get(0)?,
                attempt: row.get(1)?,
                lesson_version: row.get(2)?,
                profile_version: row.get(3)?,
                adaptation_style: row.get(4)?,
                content_blocks: json_col(row, 5)?,
                ai_model_used: row.get(6)?,
                generated_at: opt_ts_col(row, 7)?,
                superseded_at: ts_col(row, 8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<AdaptationRevision>>>()?;
    Ok(revisions)
}

pub fn increment_view_count(conn: &Connection, adapted_lesson_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE adapted_lessons SET view_count = view_count + 1 WHERE id = ?",
        [adapted_lesson_id],
    )?;
    Ok(())
}

// --- Student Progress ---

pub fn load_progress(conn: &Connection, student_id: &str) -> Result<Option<StudentProgress>> {
    let aggregate = conn
        .query_row(
            "SELECT total_lessons_completed, average_score, current_streak_days,
                    longest_streak_days, last_activity_at, last_lesson_id
             FROM student_progress WHERE student_id = ?",
            [student_id],
            |row| {
                let mut p = StudentProgress::new(student_id);
                p.total_lessons_completed = row.get(0)?;
                p.average_score = row.get(1)?;
                p.current_streak_days = row.get(2)?;
                p.longest_streak_days = row.get(3)?;
                p.last_activity_at = opt_ts_col(row, 4)?;
                p.last_lesson_id = row.get(5)?;
                Ok(p)
            },
        )
        .optional()?;

    let Some(mut progress) = aggregate else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT lesson_id, status, blocks_completed, total_blocks, time_spent_seconds, score,
                started_at, completed_at
         FROM lesson_progress WHERE student_id = ?",
    )?;
    let lessons = stmt
        .query_map([student_id], |row| {
            Ok(LessonProgress {
                lesson_id: row.get(0)?,
                status: enum_col(row, 1)?,
                blocks_completed: row.get(2)?,
                total_blocks: row.get(3)?,
                time_spent_seconds: u64_col(row, 4)?,
                score: row.get(5)?,
                started_at: opt_ts_col(row, 6)?,
                completed_at: opt_ts_col(row, 7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<LessonProgress>>>()?;

    progress.lessons = lessons
        .into_iter()
        .map(|lp| (lp.lesson_id.clone(), lp))
        .collect::<BTreeMap<_, _>>();
    progress.total_time_spent_seconds = progress
        .lessons
        .values()
        .map(|lp| lp.time_spent_seconds)
        .sum();
    Ok(Some(progress))
}

/// Persists the aggregate row and one lesson entry together.
pub fn save_progress(conn: &Connection, p: &StudentProgress, lesson_id: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO student_progress
            (student_id, total_lessons_completed, average_score, current_streak_days,
             longest_streak_days, last_activity_at, last_lesson_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            p.student_id,
            p.total_lessons_completed,
            p.average_score,
            p.current_streak_days,
            p.longest_streak_days,
            p.last_activity_at.map(millis),
            p.last_lesson_id
        ],
    )?;
    if let Some(lp) = p.lessons.get(lesson_id) {
        tx.execute(
            "INSERT OR REPLACE INTO lesson_progress
                (student_id, lesson_id, status, blocks_completed, total_blocks,
                 time_spent_seconds, score, started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                p.student_id,
                lp.lesson_id,
                lp.status.as_str(),
                lp.blocks_completed,
                lp.total_blocks,
                lp.time_spent_seconds as i64,
                lp.score,
                lp.started_at.map(millis),
                lp.completed_at.map(millis)
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

// --- Training Data ---

const TRAINING_COLUMNS: &str = "id, source_id, source_type, block_id, model_name, input_context,
     model_output, human_correction, was_accepted, corrected_by_user_id, correction_type,
     correction_notes, is_processed, processed_at, training_batch_id, created_at";

fn row_to_training_log(row: &Row) -> rusqlite::Result<TrainingDataLog> {
    Ok(TrainingDataLog {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_type: row.get(2)?,
        block_id: row.get(3)?,
        model_name: row.get(4)?,
        input_context: json_col(row, 5)?,
        model_output: json_col(row, 6)?,
        human_correction: opt_json_col(row, 7)?,
        was_accepted: row.get(8)?,
        corrected_by_user_id: row.get(9)?,
        correction_type: opt_enum_col(row, 10)?,
        correction_notes: row.get(11)?,
        is_processed: row.get(12)?,
        processed_at: opt_ts_col(row, 13)?,
        training_batch_id: row.get(14)?,
        created_at: ts_col(row, 15)?,
    })
}

pub fn insert_training_log(conn: &Connection, t: &TrainingDataLog) -> Result<()> {
    let correction = match &t.human_correction {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO training_data_logs
            (id, source_id, source_type, block_id, model_name, input_context, model_output,
             human_correction, was_accepted, corrected_by_user_id, correction_type,
             correction_notes, is_processed, processed_at, training_batch_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            t.id,
            t.source_id,
            t.source_type,
            t.block_id,
            t.model_name,
            serde_json::to_string(&t.input_context)?,
            serde_json::to_string(&t.model_output)?,
            correction,
            t.was_accepted,
            t.corrected_by_user_id,
            t.correction_type.map(|c| c.as_str()),
            t.correction_notes,
            t.is_processed,
            t.processed_at.map(millis),
            t.training_batch_id,
            millis(t.created_at)
        ],
    )?;
    Ok(())
}

pub fn get_training_log(conn: &Connection, id: &str) -> Result<Option<TrainingDataLog>> {
    let sql = format!("SELECT {} FROM training_data_logs WHERE id = ?", TRAINING_COLUMNS);
    let log = conn.query_row(&sql, [id], row_to_training_log).optional()?;
    Ok(log)
}

pub fn list_training_logs_for_source(
    conn: &Connection,
    source_id: &str,
) -> Result<Vec<TrainingDataLog>> {
    let sql = format!(
        "SELECT {} FROM training_data_logs WHERE source_id = ? ORDER BY created_at ASC, id ASC",
        TRAINING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let logs = stmt
        .query_map([source_id], row_to_training_log)?
        .collect::<rusqlite::Result<Vec<TrainingDataLog>>>()?;
    Ok(logs)
}

pub fn list_unprocessed_training_logs(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<TrainingDataLog>> {
    let sql = format!(
        "SELECT {} FROM training_data_logs WHERE is_processed = 0
         ORDER BY created_at ASC, id ASC LIMIT ?",
        TRAINING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let logs = stmt
        .query_map([limit as i64], row_to_training_log)?
        .collect::<rusqlite::Result<Vec<TrainingDataLog>>>()?;
    Ok(logs)
}

/// The only mutation allowed on a training log.
pub fn mark_training_logs_processed(
    conn: &Connection,
    ids: &[String],
    batch_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "UPDATE training_data_logs SET is_processed = 1, processed_at = ?, training_batch_id = ?
         WHERE is_processed = 0 AND id IN ({})",
        placeholders
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params.push(Box::new(millis(now)));
    params.push(Box::new(batch_id.to_string()));
    for id in ids {
        params.push(Box::new(id.clone()));
    }

    let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(changed)
}

/// (total, with_corrections, accepted_without_changes, unprocessed, per correction type)
pub fn training_counts(
    conn: &Connection,
) -> Result<(u64, u64, u64, u64, BTreeMap<String, u64>)> {
    let (total, corrected, accepted, unprocessed): (i64, i64, i64, i64) = conn.query_row(
        "SELECT count(*),
                COALESCE(SUM(human_correction IS NOT NULL), 0),
                COALESCE(SUM(was_accepted = 1 AND human_correction IS NULL), 0),
                COALESCE(SUM(is_processed = 0), 0)
         FROM training_data_logs",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT correction_type, count(*) FROM training_data_logs
         WHERE correction_type IS NOT NULL GROUP BY correction_type",
    )?;
    let by_type = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<BTreeMap<String, u64>>>()?;

    Ok((
        total as u64,
        corrected as u64,
        accepted as u64,
        unprocessed as u64,
        by_type,
    ))
}
