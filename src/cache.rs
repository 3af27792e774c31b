// src/cache.rs

//! Single-flight lookup of per-(lesson, student) adaptations.
//!
//! The row's `status` column is the only coordination point. A caller that
//! flips PENDING/FAILED/stale-GENERATING to GENERATING through the conditional
//! update in `repository::try_claim_adaptation` owns the generation attempt;
//! everyone else polls the row until it settles or the wait times out.

use crate::config::EngineConfig;
use crate::constants::MAX_PLAY_ROUNDS;
use crate::error::{EngineError, Result};
use crate::feedback;
use crate::generator;
use crate::model::GenerativeModel;
use crate::models::{AdaptationStatus, AdaptedLesson, Lesson, NeuroProfile};
use crate::repository;
use crate::store::Store;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Serialize, Debug, Clone)]
pub struct PlayOutcome {
    pub adapted: AdaptedLesson,
    /// True only for the caller that generated the content
    pub is_fresh: bool,
    /// Set when the row is not READY; the client should ask again after it
    pub retry_after: Option<Duration>,
}

impl PlayOutcome {
    fn settled(adapted: AdaptedLesson, is_fresh: bool) -> Self {
        PlayOutcome {
            adapted,
            is_fresh,
            retry_after: None,
        }
    }

    fn retry(adapted: AdaptedLesson, hint: Duration) -> Self {
        PlayOutcome {
            adapted,
            is_fresh: false,
            retry_after: Some(hint),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.adapted.status == AdaptationStatus::Ready
    }
}

enum Waited {
    Settled(PlayOutcome),
    Reclaim,
}

pub struct AdaptationCache<'a> {
    store: &'a Store,
    model: &'a Arc<dyn GenerativeModel>,
    config: &'a EngineConfig,
}

impl<'a> AdaptationCache<'a> {
    pub fn new(
        store: &'a Store,
        model: &'a Arc<dyn GenerativeModel>,
        config: &'a EngineConfig,
    ) -> Self {
        AdaptationCache {
            store,
            model,
            config,
        }
    }

    pub fn get_or_create(&self, lesson: &Lesson, profile: &NeuroProfile) -> Result<PlayOutcome> {
        let key = format!("{}/{}", lesson.id, profile.student_id);
        let mut last_seen: Option<AdaptedLesson> = None;

        for round in 0..MAX_PLAY_ROUNDS {
            let existing = self.store.with_conn(|conn| {
                repository::find_adaptation(conn, &lesson.id, &profile.student_id)
            })?;

            let Some(row) = existing else {
                let fresh = new_pending_row(lesson, profile, Utc::now());
                let inserted = self
                    .store
                    .with_conn(|conn| repository::insert_pending_adaptation(conn, &fresh))?;
                debug!("[Cache] {} created PENDING row (inserted: {})", key, inserted);
                continue;
            };

            let outdated = row.lesson_version != lesson.content_version
                || row.profile_version != profile.version;

            let status = row.status;
            match status {
                AdaptationStatus::Ready if !outdated => {
                    self.store
                        .with_conn(|conn| repository::increment_view_count(conn, &row.id))?;
                    let mut hit = row;
                    hit.view_count += 1;
                    debug!("[Cache] Hit for {} (views: {})", key, hit.view_count);
                    return Ok(PlayOutcome::settled(hit, false));
                }
                AdaptationStatus::Ready => {
                    info!(
                        "[Cache] {} outdated (lesson v{} -> v{}, profile v{} -> v{}), superseding",
                        key,
                        row.lesson_version,
                        lesson.content_version,
                        row.profile_version,
                        profile.version
                    );
                    self.store.with_conn(|conn| {
                        repository::supersede_adaptation(
                            conn,
                            &row,
                            lesson.content_version,
                            profile.version,
                            Utc::now(),
                        )
                    })?;
                    continue;
                }
                _ => {}
            }

            let now = Utc::now();
            let stale_before =
                now - chrono::Duration::milliseconds(self.config.stale_generation_ms as i64);
            let claimed = self.store.with_conn(|conn| {
                repository::try_claim_adaptation(
                    conn,
                    &row.id,
                    &lesson.title,
                    lesson.content_version,
                    profile.version,
                    now,
                    stale_before,
                )
            })?;

            if let Some(attempt) = claimed {
                info!(
                    "[Cache] {} claimed attempt {} (round {})",
                    key, attempt, round
                );
                return self.generate_claimed(&row.id, attempt, lesson, profile);
            }

            match self.wait_for(&row.id, &key)? {
                Waited::Settled(outcome) => return Ok(outcome),
                Waited::Reclaim => {
                    last_seen = Some(row);
                    continue;
                }
            }
        }

        // Rows kept changing under us; hand back what we last saw
        let current = match self.store.with_conn(|conn| {
            repository::find_adaptation(conn, &lesson.id, &profile.student_id)
        })? {
            Some(row) => row,
            None => match last_seen {
                Some(row) => row,
                None => new_pending_row(lesson, profile, Utc::now()),
            },
        };
        warn!(
            "[Cache] {} did not settle after {} rounds (status: {})",
            key, MAX_PLAY_ROUNDS, current.status
        );
        Ok(PlayOutcome::retry(current, self.config.retry_hint()))
    }

    /// Runs the one model call this claim owns. The store lock is not held
    /// while the model runs.
    fn generate_claimed(
        &self,
        adapted_id: &str,
        attempt: u32,
        lesson: &Lesson,
        profile: &NeuroProfile,
    ) -> Result<PlayOutcome> {
        match generator::generate(self.model, lesson, profile, self.config) {
            Ok(generated) => {
                let now = Utc::now();
                let written = self.store.with_conn(|conn| {
                    let written = repository::complete_adaptation(
                        conn,
                        adapted_id,
                        attempt,
                        &generated.report.blocks,
                        &generated.adaptation_style,
                        &generated.model_name,
                        generated.duration_ms,
                        now,
                    )?;
                    if written {
                        repository::increment_adaptation_count(conn, &lesson.id)?;
                        feedback::log_generation(conn, adapted_id, &generated, now)?;
                    }
                    Ok(written)
                })?;

                let row = self.reload(adapted_id)?;
                if written {
                    info!(
                        "[Cache] {} READY with {} blocks (attempt {})",
                        adapted_id,
                        row.content_blocks.len(),
                        attempt
                    );
                    Ok(PlayOutcome::settled(row, true))
                } else {
                    warn!(
                        "[Cache] Attempt {} on {} lost its claim before writing",
                        attempt, adapted_id
                    );
                    Ok(self.outcome_for(row))
                }
            }
            Err(err) => {
                warn!(
                    "[Cache] Generation attempt {} on {} failed: {}",
                    attempt, adapted_id, err
                );
                let reason = err.to_string();
                self.store.with_conn(|conn| {
                    repository::fail_adaptation(conn, adapted_id, attempt, &reason, Utc::now())
                })?;
                let row = self.reload(adapted_id)?;
                Ok(self.outcome_for(row))
            }
        }
    }

    /// Polls a row another caller is generating.
    fn wait_for(&self, adapted_id: &str, key: &str) -> Result<Waited> {
        let deadline = Instant::now() + self.config.claim_wait_timeout();
        debug!("[Cache] {} busy, waiting up to {:?}", key, self.config.claim_wait_timeout());

        loop {
            let row = self.reload(adapted_id)?;
            let status = row.status;
            match status {
                AdaptationStatus::Ready | AdaptationStatus::Failed => {
                    return Ok(Waited::Settled(self.outcome_for(row)))
                }
                AdaptationStatus::Pending => return Ok(Waited::Reclaim),
                AdaptationStatus::Generating if is_stale(&row, self.config, Utc::now()) => {
                    warn!("[Cache] {} stuck in GENERATING, reclaiming", key);
                    return Ok(Waited::Reclaim);
                }
                AdaptationStatus::Generating => {}
            }

            let now = Instant::now();
            if now >= deadline {
                info!("[Cache] {} still generating after wait, returning retry hint", key);
                return Ok(Waited::Settled(PlayOutcome::retry(
                    row,
                    self.config.retry_hint(),
                )));
            }
            thread::sleep(self.config.claim_poll_interval().min(deadline - now));
        }
    }

    fn reload(&self, adapted_id: &str) -> Result<AdaptedLesson> {
        self.store
            .with_conn(|conn| repository::get_adaptation(conn, adapted_id))?
            .ok_or_else(|| EngineError::not_found("AdaptedLesson", adapted_id))
    }

    fn outcome_for(&self, row: AdaptedLesson) -> PlayOutcome {
        match row.status {
            AdaptationStatus::Ready => PlayOutcome::settled(row, false),
            _ => PlayOutcome::retry(row, self.config.retry_hint()),
        }
    }
}

fn is_stale(row: &AdaptedLesson, config: &EngineConfig, now: DateTime<Utc>) -> bool {
    match row.claimed_at {
        Some(claimed) => {
            now - claimed > chrono::Duration::milliseconds(config.stale_generation_ms as i64)
        }
        None => true,
    }
}

fn new_pending_row(lesson: &Lesson, profile: &NeuroProfile, now: DateTime<Utc>) -> AdaptedLesson {
    AdaptedLesson {
        id: uuid::Uuid::new_v4().to_string(),
        lesson_id: lesson.id.clone(),
        student_id: profile.student_id.clone(),
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
        created_at: now,
        updated_at: now,
    }
}
