// src/progress.rs

use crate::error::{EngineError, Result};
use crate::models::{LessonProgress, ProgressStatus, ProgressUpdate, StudentProgress};
use crate::repository;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::BTreeMap;

// --- Public Interface ---

/// Loads, folds and persists one progress event. Returns the new snapshot.
pub fn record(
    conn: &Connection,
    student_id: &str,
    update: &ProgressUpdate,
    total_blocks_hint: Option<u32>,
    now: DateTime<Utc>,
) -> Result<StudentProgress> {
    if update.lesson_id.trim().is_empty() {
        return Err(EngineError::validation("lesson_id", "must not be empty"));
    }
    if let Some(score) = update.quiz_score {
        if !score.is_finite() || score < 0.0 {
            return Err(EngineError::validation(
                "quiz_score",
                format!("{} is not a valid score", score),
            ));
        }
    }

    let mut progress = repository::load_progress(conn, student_id)?
        .unwrap_or_else(|| StudentProgress::new(student_id));

    apply_update(&mut progress, update, total_blocks_hint, now);
    repository::save_progress(conn, &progress, &update.lesson_id)?;
    Ok(progress)
}

pub fn snapshot(conn: &Connection, student_id: &str) -> Result<StudentProgress> {
    Ok(repository::load_progress(conn, student_id)?
        .unwrap_or_else(|| StudentProgress::new(student_id)))
}

/// Folds one event into the aggregate. Returns true when this event
/// completed the lesson for the first time.
pub fn apply_update(
    progress: &mut StudentProgress,
    update: &ProgressUpdate,
    total_blocks_hint: Option<u32>,
    now: DateTime<Utc>,
) -> bool {
    // Most recent completion on another lesson anchors the streak
    let last_completion_day = progress
        .lessons
        .values()
        .filter(|lp| lp.lesson_id != update.lesson_id)
        .filter_map(|lp| lp.completed_at)
        .max()
        .map(|ts| ts.date_naive());

    let lesson = progress
        .lessons
        .entry(update.lesson_id.clone())
        .or_insert_with(|| LessonProgress::new(&update.lesson_id));

    debug!(
        "[Progress Input] Lesson {}: blocks {} -> {}, time {}s -> {}s, completed: {}",
        update.lesson_id,
        lesson.blocks_completed,
        update.blocks_completed,
        lesson.time_spent_seconds,
        update.time_spent_seconds,
        update.is_completed
    );

    if lesson.started_at.is_none() {
        lesson.started_at = Some(now);
    }
    // Out-of-order delivery never moves a lesson backwards
    lesson.blocks_completed = lesson.blocks_completed.max(update.blocks_completed);
    lesson.total_blocks = lesson
        .total_blocks
        .max(total_blocks_hint.unwrap_or(0))
        .max(lesson.blocks_completed);
    lesson.time_spent_seconds = update.time_spent_seconds;
    if update.quiz_score.is_some() && lesson.status != ProgressStatus::Completed {
        lesson.score = update.quiz_score;
    }

    let newly_completed = update.is_completed && lesson.status != ProgressStatus::Completed;
    if newly_completed {
        lesson.status = ProgressStatus::Completed;
        lesson.completed_at = Some(now);
        lesson.blocks_completed = lesson.total_blocks;
    } else if lesson.status == ProgressStatus::NotStarted {
        lesson.status = ProgressStatus::InProgress;
    }

    if newly_completed {
        progress.total_lessons_completed += 1;
        progress.average_score = completed_mean(&progress.lessons);
        progress.current_streak_days = next_streak(
            progress.current_streak_days,
            last_completion_day,
            now.date_naive(),
        );
    }
    progress.longest_streak_days = progress
        .longest_streak_days
        .max(progress.current_streak_days);

    progress.total_time_spent_seconds = progress
        .lessons
        .values()
        .map(|lp| lp.time_spent_seconds)
        .sum();
    progress.last_activity_at = Some(now);
    progress.last_lesson_id = Some(update.lesson_id.clone());

    info!(
        "[Progress Result] Student {}: completed {}, avg {:.1}, streak {} (longest {})",
        progress.student_id,
        progress.total_lessons_completed,
        progress.average_score,
        progress.current_streak_days,
        progress.longest_streak_days
    );
    newly_completed
}

// --- Internal Helpers ---

/// Mean score over completed lessons that carry one; 0 when none do.
fn completed_mean(lessons: &BTreeMap<String, LessonProgress>) -> f64 {
    let scores: Vec<f64> = lessons
        .values()
        .filter(|lp| lp.status == ProgressStatus::Completed)
        .filter_map(|lp| lp.score)
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn next_streak(current: u32, last_day: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_day {
        Some(day) if day == today => current.max(1),
        Some(day) if day.succ_opt() == Some(today) => current + 1,
        _ => 1,
    }
}
