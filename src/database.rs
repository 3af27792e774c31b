// src/database.rs

use crate::error::Result;
use crate::models::Question;
use crate::repository;
use log::{debug, info};
use rusqlite::Connection;

pub fn init_db(conn: &Connection) -> Result<()> {
    debug!("[DB] init_db: Checking database schema...");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS assessment_questions (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            question_type TEXT NOT NULL
                CHECK (question_type IN ('single_choice','multiple_choice','scale','text_input')),
            category TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '[]',
            scale_min INTEGER NOT NULL DEFAULT 1,
            scale_max INTEGER NOT NULL DEFAULT 5,
            is_required INTEGER NOT NULL DEFAULT 1,
            ord INTEGER NOT NULL,
            dimension TEXT
        );
        CREATE TABLE IF NOT EXISTS assessments (
            id TEXT PRIMARY KEY,
            student_id TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('not_started','in_progress','processing','completed')),
            answers TEXT NOT NULL DEFAULT '[]',
            current_question_index INTEGER NOT NULL DEFAULT 0,
            total_questions INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER,
            completed_at INTEGER,
            generated_profile_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS neuro_profiles (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            learning_style TEXT NOT NULL,
            reading_level TEXT NOT NULL,
            complexity_tolerance TEXT NOT NULL,
            attention_span_minutes INTEGER NOT NULL CHECK (attention_span_minutes > 0),
            sensory_triggers TEXT NOT NULL DEFAULT '[]',
            interests TEXT NOT NULL DEFAULT '[]',
            confidence_scores TEXT NOT NULL DEFAULT '{}',
            generated_profile TEXT,
            assessment_id TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE (student_id, version)
        );
        CREATE TABLE IF NOT EXISTS lessons (
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            school_id TEXT,
            title TEXT NOT NULL,
            description TEXT,
            subject TEXT,
            original_text_content TEXT NOT NULL,
            media_url TEXT,
            status TEXT NOT NULL CHECK (status IN ('draft','published','archived')),
            content_version INTEGER NOT NULL DEFAULT 1,
            adaptation_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            published_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS adapted_lessons (
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            lesson_title TEXT NOT NULL,
            adaptation_style TEXT,
            status TEXT NOT NULL
                CHECK (status IN ('pending','generating','ready','failed')),
            content_blocks TEXT NOT NULL DEFAULT '[]',
            lesson_version INTEGER NOT NULL,
            profile_version INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            ai_model_used TEXT,
            generation_duration_ms INTEGER,
            failure_reason TEXT,
            claimed_at INTEGER,
            generated_at INTEGER,
            view_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (lesson_id, student_id)
        );
        CREATE TABLE IF NOT EXISTS adapted_lesson_revisions (
            id INTEGER PRIMARY KEY,
            adapted_lesson_id TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            lesson_version INTEGER NOT NULL,
            profile_version INTEGER NOT NULL,
            adaptation_style TEXT,
            content_blocks TEXT NOT NULL,
            ai_model_used TEXT,
            generated_at INTEGER,
            superseded_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS student_progress (
            student_id TEXT PRIMARY KEY,
            total_lessons_completed INTEGER NOT NULL DEFAULT 0,
            average_score REAL NOT NULL DEFAULT 0.0,
            current_streak_days INTEGER NOT NULL DEFAULT 0,
            longest_streak_days INTEGER NOT NULL DEFAULT 0,
            last_activity_at INTEGER,
            last_lesson_id TEXT,
            CHECK (current_streak_days <= longest_streak_days)
        );
        CREATE TABLE IF NOT EXISTS lesson_progress (
            student_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('not_started','in_progress','completed')),
            blocks_completed INTEGER NOT NULL DEFAULT 0,
            total_blocks INTEGER NOT NULL DEFAULT 0,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            score REAL,
            started_at INTEGER,
            completed_at INTEGER,
            PRIMARY KEY (student_id, lesson_id)
        );
        CREATE TABLE IF NOT EXISTS training_data_logs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            block_id TEXT,
            model_name TEXT NOT NULL,
            input_context TEXT NOT NULL,
            model_output TEXT NOT NULL,
            human_correction TEXT,
            was_accepted INTEGER NOT NULL,
            corrected_by_user_id TEXT,
            correction_type TEXT,
            correction_notes TEXT,
            is_processed INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER,
            training_batch_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_training_unprocessed
            ON training_data_logs (is_processed, created_at);
        ",
    )?;

    let count: i64 = conn.query_row("SELECT count(*) FROM assessment_questions", [], |row| {
        row.get(0)
    })?;
    if count == 0 {
        info!("[DB] init_db: Question bank empty. Seeding data...");
        seed_data(conn)?;
    }

    Ok(())
}

fn seed_data(conn: &Connection) -> Result<()> {
    let data = include_str!("data/assessment_questions.json");
    let questions: Vec<Question> = serde_json::from_str(data)?;

    for q in &questions {
        repository::insert_question(conn, q)?;
    }
    debug!("[DB] Seeded {} assessment questions", questions.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_seeds_once() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let questions = repository::list_questions(&conn).unwrap();
        assert_eq!(questions.len(), 7);
        assert_eq!(questions[0].id, 1);
    }
}
