// tests/feedback_progress.rs

mod common;

use common::*;
use lesson_adapt::models::{CorrectionType, ProgressStatus, ProgressUpdate};
use lesson_adapt::EngineError;
use std::sync::Arc;

#[test]
fn correction_does_not_touch_served_content() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);
    let served = engine.get_adapted_lesson(&kid, &lesson.id).unwrap().adapted;

    let log = engine
        .record_feedback(
            &teacher(),
            &served.id,
            "block_3",
            "Plants use sunlight to make their own food.",
            CorrectionType::Content,
            Some("too terse"),
        )
        .unwrap();
    assert_eq!(log.block_id.as_deref(), Some("block_3"));
    assert_eq!(log.corrected_by_user_id.as_deref(), Some("teacher-1"));
    assert!(!log.was_accepted);
    assert_eq!(log.model_output["content"], "Sunlight feeds plants.");

    let reread = engine.get_adaptation(&served.id).unwrap();
    assert_eq!(reread.content_blocks, served.content_blocks);

    // One accepted generation sample plus the correction
    let logs = engine.training_logs_for(&served.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs.iter().filter(|l| l.has_correction()).count(), 1);
}

#[test]
fn correction_targets_must_exist() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);
    let served = engine.get_adapted_lesson(&kid, &lesson.id).unwrap().adapted;

    let err = engine
        .record_feedback(&teacher(), "nope", "block_0", "x", CorrectionType::Style, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "AdaptedLesson", .. }));

    let err = engine
        .record_feedback(&teacher(), &served.id, "block_42", "x", CorrectionType::Style, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "ContentBlock", .. }));
}

#[test]
fn training_batch_exports_generation_and_correction() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);
    let served = engine.get_adapted_lesson(&kid, &lesson.id).unwrap().adapted;
    engine
        .record_feedback(
            &teacher(),
            &served.id,
            "block_0",
            "How do plants eat?",
            CorrectionType::Style,
            None,
        )
        .unwrap();

    let stats = engine.training_stats().unwrap();
    assert_eq!(stats.total_logs, 2);
    assert_eq!(stats.unprocessed, 2);

    let batch = engine.prepare_training_batch(100).unwrap();
    assert_eq!(batch.sft.len(), 1);
    assert_eq!(batch.dpo.len(), 1);
    assert_eq!(batch.dpo[0].correction_type, Some(CorrectionType::Style));
    assert_eq!(batch.marked, 2);
    assert_eq!(engine.training_stats().unwrap().unprocessed, 0);
}

#[test]
fn progress_uses_adapted_block_count() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);
    engine.get_adapted_lesson(&kid, &lesson.id).unwrap();

    let mut update = ProgressUpdate {
        lesson_id: lesson.id.clone(),
        blocks_completed: 2,
        time_spent_seconds: 90,
        quiz_score: None,
        is_completed: false,
    };
    engine.update_progress(&kid, &update).unwrap();
    update.blocks_completed = 1;
    update.time_spent_seconds = 120;
    let snapshot = engine.update_progress(&kid, &update).unwrap();

    let entry = &snapshot.lessons[&lesson.id];
    assert_eq!(entry.blocks_completed, 2);
    assert_eq!(entry.total_blocks, 4);
    assert_eq!(entry.progress_percentage(), 50.0);
    assert_eq!(snapshot.total_time_spent_seconds, 120);

    update.is_completed = true;
    update.quiz_score = Some(75.0);
    engine.update_progress(&kid, &update).unwrap();

    let stored = engine.get_progress("s1").unwrap();
    assert_eq!(stored.total_lessons_completed, 1);
    assert_eq!(stored.average_score, 75.0);
    assert_eq!(stored.current_streak_days, 1);
    assert_eq!(stored.lessons[&lesson.id].status, ProgressStatus::Completed);
    assert_eq!(stored.last_lesson_id.as_deref(), Some(lesson.id.as_str()));
}

#[test]
fn progress_for_unknown_lesson_is_not_found() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);

    let update = ProgressUpdate {
        lesson_id: "ghost".into(),
        blocks_completed: 1,
        time_spent_seconds: 10,
        quiz_score: None,
        is_completed: false,
    };
    let err = engine.update_progress(&student("s1"), &update).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(engine.get_progress("s1").unwrap().total_lessons_completed, 0);
}
