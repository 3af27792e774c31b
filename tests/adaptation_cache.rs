// tests/adaptation_cache.rs

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use lesson_adapt::models::{AdaptationStatus, BlockType};
use lesson_adapt::{repository, EngineError, ModelError, Store};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn first_play_generates_and_second_play_hits_cache() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let first = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(first.is_fresh);
    assert!(first.is_ready());
    assert!(first.retry_after.is_none());
    assert_eq!(first.adapted.content_blocks.len(), 4);
    assert_eq!(first.adapted.adaptation_style.as_deref(), Some("Visual"));
    assert_eq!(first.adapted.ai_model_used.as_deref(), Some("scripted-model"));
    let orders: Vec<u32> = first.adapted.content_blocks.iter().map(|b| b.order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);

    let second = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(!second.is_fresh);
    assert_eq!(second.adapted.id, first.adapted.id);
    assert_eq!(second.adapted.view_count, 1);
    assert_eq!(model.calls(), 1);

    let lesson = engine.get_lesson(&lesson.id).unwrap();
    assert_eq!(lesson.adaptation_count, 1);
}

#[test]
fn concurrent_plays_share_one_generation() {
    let model = Arc::new(
        ScriptedModel::always(GOOD_OUTPUT).with_delay(Duration::from_millis(200)),
    );
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let barrier = Barrier::new(2);
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    engine.get_adapted_lesson(&kid, &lesson.id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(model.calls(), 1);
    assert!(outcomes.iter().all(|o| o.is_ready()));
    assert_eq!(outcomes.iter().filter(|o| o.is_fresh).count(), 1);
    assert_eq!(outcomes[0].adapted.id, outcomes[1].adapted.id);
}

#[test]
fn failed_generation_is_retried_by_next_play() {
    let model = Arc::new(
        ScriptedModel::always(GOOD_OUTPUT).then(Err(ModelError::Unavailable("down".into()))),
    );
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let failed = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert_eq!(failed.adapted.status, AdaptationStatus::Failed);
    assert!(failed.retry_after.is_some());
    assert!(failed.adapted.content_blocks.is_empty());
    assert!(failed
        .adapted
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("down"));

    let retried = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(retried.is_fresh);
    assert_eq!(retried.adapted.status, AdaptationStatus::Ready);
    assert_eq!(retried.adapted.attempt, 2);
    assert_eq!(model.calls(), 2);
}

#[test]
fn timed_out_generation_is_failed_then_retried() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT).slow_once(Duration::from_millis(500)));
    let config = lesson_adapt::EngineConfig {
        generation_timeout_ms: 100,
        ..test_config()
    };
    let engine = engine_on(Store::open_in_memory().unwrap(), &model, config);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let timed_out = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert_eq!(timed_out.adapted.status, AdaptationStatus::Failed);
    assert!(timed_out.retry_after.is_some());
    let reason = timed_out.adapted.failure_reason.clone().unwrap_or_default();
    assert!(reason.contains("timed out"), "got {reason}");

    let stored = engine.get_adaptation(&timed_out.adapted.id).unwrap();
    assert_eq!(stored.status, AdaptationStatus::Failed);

    let retried = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(retried.is_fresh);
    assert_eq!(retried.adapted.status, AdaptationStatus::Ready);
    assert_eq!(retried.adapted.attempt, 2);
    assert_eq!(model.calls(), 2);
}

#[test]
fn unparsable_output_fails_the_attempt() {
    let model = Arc::new(
        ScriptedModel::always(GOOD_OUTPUT).then(Ok("Sorry, I can't produce JSON today.")),
    );
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let outcome = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert_eq!(outcome.adapted.status, AdaptationStatus::Failed);
    assert!(outcome.adapted.content_blocks.is_empty());
}

#[test]
fn repaired_output_is_cached() {
    let messy = r#"```json
    {"blocks": [
      {"type": "summary", "content": "Recap"},
      {"type": "video", "content": "unsupported"},
      {"type": "quiz", "question": "Pick", "options": ["A", "B"], "correct_index": 9}
    ]}
    ```"#;
    let model = Arc::new(ScriptedModel::always(messy));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let outcome = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    let blocks = &outcome.adapted.content_blocks;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].block_type, BlockType::Text);
    assert!(blocks[1].correct_index.is_none());
    assert_eq!(blocks[1].order, 1);
    assert_eq!(outcome.adapted.adaptation_style.as_deref(), Some("Personalized"));
}

#[test]
fn new_profile_version_invalidates_cached_adaptation() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    let first = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();

    engine.retake_assessment(&kid).unwrap();
    let v2 = onboard(&engine, &kid);
    assert_eq!(v2.version, 2);

    let second = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(second.is_fresh);
    assert_eq!(second.adapted.id, first.adapted.id);
    assert_eq!(second.adapted.profile_version, 2);
    assert_eq!(model.calls(), 2);

    let history = engine.adaptation_history(&first.adapted.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].profile_version, 1);
    assert_eq!(history[0].content_blocks, first.adapted.content_blocks);
}

#[test]
fn republished_lesson_invalidates_cached_adaptation() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    let lesson = engine
        .republish_lesson(&teacher(), &lesson.id, "Plants breathe out oxygen.")
        .unwrap();
    assert_eq!(lesson.content_version, 2);

    let outcome = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(outcome.is_fresh);
    assert_eq!(outcome.adapted.lesson_version, 2);
    assert_eq!(model.calls(), 2);
}

#[test]
fn stale_generating_row_is_reclaimed() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    let profile = onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    // A worker claimed the row long ago and never came back
    let long_ago = Utc::now() - ChronoDuration::minutes(10);
    let crashed = engine
        .store()
        .with_conn(|conn| {
            let row = lesson_adapt::models::AdaptedLesson {
                id: "crashed".into(),
                lesson_id: lesson.id.clone(),
                student_id: kid.user_id.clone(),
                lesson_title: lesson.title.clone(),
                adaptation_style: None,
                status: AdaptationStatus::Pending,
                content_blocks: Vec::new(),
                lesson_version: lesson.content_version,
                profile_version: profile.version,
                attempt: 0,
                ai_model_used: None,
                generation_duration_ms: None,
                failure_reason: None,
                claimed_at: None,
                generated_at: None,
                view_count: 0,
                created_at: long_ago,
                updated_at: long_ago,
            };
            repository::insert_pending_adaptation(conn, &row)?;
            repository::try_claim_adaptation(
                conn,
                &row.id,
                &row.lesson_title,
                row.lesson_version,
                row.profile_version,
                long_ago,
                long_ago,
            )
        })
        .unwrap();
    assert_eq!(crashed, Some(1));

    let outcome = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
    assert!(outcome.is_fresh);
    assert_eq!(outcome.adapted.attempt, 2);
    assert_eq!(outcome.adapted.status, AdaptationStatus::Ready);

    // The crashed worker's late write is fenced off
    let late = engine
        .store()
        .with_conn(|conn| {
            repository::fail_adaptation(conn, "crashed", 1, "late failure", Utc::now())
        })
        .unwrap();
    assert!(!late);
    assert_eq!(
        engine.get_adaptation("crashed").unwrap().status,
        AdaptationStatus::Ready
    );
}

#[test]
fn waiter_gets_retry_hint_when_generation_outlasts_wait() {
    let model = Arc::new(
        ScriptedModel::always(GOOD_OUTPUT).with_delay(Duration::from_millis(500)),
    );
    let config = lesson_adapt::EngineConfig {
        claim_wait_timeout_ms: 50,
        ..test_config()
    };
    let engine = engine_on(Store::open_in_memory().unwrap(), &model, config);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);

    thread::scope(|s| {
        let generator = s.spawn(|| engine.get_adapted_lesson(&kid, &lesson.id).unwrap());
        thread::sleep(Duration::from_millis(150));

        let waiter = engine.get_adapted_lesson(&kid, &lesson.id).unwrap();
        assert_eq!(waiter.adapted.status, AdaptationStatus::Generating);
        assert_eq!(waiter.retry_after, Some(Duration::from_millis(1_000)));
        assert!(!waiter.is_fresh);

        let generated = generator.join().unwrap();
        assert!(generated.is_fresh);
        assert!(generated.is_ready());
    });
    assert_eq!(model.calls(), 1);
}

#[test]
fn workers_on_separate_connections_share_one_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let model = Arc::new(
        ScriptedModel::always(GOOD_OUTPUT).with_delay(Duration::from_millis(200)),
    );
    let first = engine_on(Store::open(&path).unwrap(), &model, test_config());
    let second = engine_on(Store::open(&path).unwrap(), &model, test_config());

    let kid = student("s1");
    onboard(&first, &kid);
    let lesson = published_lesson(&first);

    let barrier = Barrier::new(2);
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = [&first, &second]
            .into_iter()
            .map(|engine| {
                let barrier = &barrier;
                let kid = &kid;
                let lesson_id = lesson.id.as_str();
                s.spawn(move || {
                    barrier.wait();
                    engine.get_adapted_lesson(kid, lesson_id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(model.calls(), 1);
    assert!(outcomes.iter().all(|o| o.is_ready()));
    assert_eq!(outcomes[0].adapted.id, outcomes[1].adapted.id);
}

#[test]
fn archived_lesson_cannot_be_played() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let kid = student("s1");
    onboard(&engine, &kid);
    let lesson = published_lesson(&engine);
    engine.archive_lesson(&teacher(), &lesson.id).unwrap();

    let err = engine.get_adapted_lesson(&kid, &lesson.id).unwrap_err();
    assert!(matches!(err, EngineError::State { .. }), "got {err:?}");
    assert_eq!(model.calls(), 0);
}

#[test]
fn play_without_profile_is_not_found() {
    let model = Arc::new(ScriptedModel::always(GOOD_OUTPUT));
    let engine = engine(&model);
    let lesson = published_lesson(&engine);

    let err = engine
        .get_adapted_lesson(&student("newcomer"), &lesson.id)
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let err = engine
        .get_adapted_lesson(&student("newcomer"), "missing-lesson")
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "Lesson", .. }));
}
