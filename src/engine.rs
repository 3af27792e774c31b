// src/engine.rs

//! Public operations of the adaptation engine.
//!
//! Callers arrive already authenticated as an [`Actor`]. Each operation is a
//! short unit of work against the store; the only blocking calls outside the
//! store are the bounded generative-model calls.

use crate::cache::{AdaptationCache, PlayOutcome};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::feedback::{self, TrainingBatch, TrainingStats};
use crate::model::{call_bounded, GenerativeModel};
use crate::models::{
    Actor, AdaptationRevision, AdaptationStatus, AdaptedLesson, Answer, Assessment,
    AssessmentStatus, CorrectionType, Lesson, LessonStatus, NeuroProfile, NewLesson,
    ProgressUpdate, Question, Role, StudentProgress, TrainingDataLog,
};
use crate::profile;
use crate::progress;
use crate::repository;
use crate::store::Store;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

pub struct Engine {
    store: Store,
    model: Arc<dyn GenerativeModel>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Store, model: Arc<dyn GenerativeModel>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Engine {
            store,
            model,
            config,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Assessment ---

    pub fn get_questions(&self) -> Result<Vec<Question>> {
        self.store.with_conn(repository::list_questions)
    }

    /// The student's assessment, created NOT_STARTED on first access.
    pub fn get_assessment(&self, actor: &Actor) -> Result<Assessment> {
        require_student(actor)?;
        self.load_or_new_assessment(&actor.user_id)
    }

    pub fn start_assessment(&self, actor: &Actor) -> Result<Assessment> {
        require_student(actor)?;
        let mut assessment = self.load_or_new_assessment(&actor.user_id)?;
        match assessment.status {
            AssessmentStatus::NotStarted => {
                let now = Utc::now();
                assessment.status = AssessmentStatus::InProgress;
                assessment.started_at = Some(now);
                assessment.updated_at = now;
                self.store
                    .with_conn(|conn| repository::save_assessment(conn, &assessment))?;
                info!("[Profile] Assessment started for {}", actor.user_id);
                Ok(assessment)
            }
            AssessmentStatus::InProgress => Ok(assessment),
            other => Err(EngineError::state("Assessment", other.as_str(), "start")),
        }
    }

    pub fn answer_question(&self, actor: &Actor, answer: Answer) -> Result<Assessment> {
        require_student(actor)?;
        let questions = self.get_questions()?;
        let mut assessment = self.load_or_new_assessment(&actor.user_id)?;
        if assessment.status != AssessmentStatus::InProgress {
            return Err(EngineError::state(
                "Assessment",
                assessment.status.as_str(),
                "answer",
            ));
        }

        let position = questions
            .iter()
            .position(|q| q.id == answer.question_id)
            .ok_or_else(|| {
                EngineError::validation(
                    format!("question_{}", answer.question_id),
                    "answer references an unknown question",
                )
            })?;
        profile::validate_answer(&questions[position], &answer.value)?;

        assessment.record_answer(answer);
        assessment.current_question_index = assessment
            .current_question_index
            .max(position as u32 + 1)
            .min(assessment.total_questions);
        assessment.updated_at = Utc::now();
        self.store
            .with_conn(|conn| repository::save_assessment(conn, &assessment))?;
        Ok(assessment)
    }

    /// Completes the assessment and writes a new profile version.
    ///
    /// `answers` are merged over any answers recorded incrementally. The
    /// qualitative summary is best-effort and never blocks the profile.
    pub fn submit_assessment(&self, actor: &Actor, answers: &[Answer]) -> Result<NeuroProfile> {
        require_student(actor)?;
        let student_id = actor.user_id.as_str();
        let questions = self.get_questions()?;
        let mut assessment = self.load_or_new_assessment(student_id)?;

        match assessment.status {
            AssessmentStatus::NotStarted | AssessmentStatus::InProgress => {}
            other => return Err(EngineError::state("Assessment", other.as_str(), "submit")),
        }

        for answer in answers {
            assessment.record_answer(answer.clone());
        }
        let draft = profile::build(&questions, &assessment.answers, &self.config)?;

        let now = Utc::now();
        let previous_status = assessment.status;
        assessment.status = AssessmentStatus::Processing;
        assessment.started_at.get_or_insert(now);
        assessment.updated_at = now;
        let claimed = self
            .store
            .with_conn(|conn| repository::begin_assessment_processing(conn, &assessment))?;
        if !claimed {
            let current = self
                .store
                .with_conn(|conn| repository::find_assessment(conn, student_id))?
                .map(|a| a.status)
                .unwrap_or(AssessmentStatus::Processing);
            return Err(EngineError::state("Assessment", current.as_str(), "submit"));
        }

        let generated_profile = self.enrich_profile(student_id, &questions, &assessment.answers, &draft);

        let written = self.store.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let version = repository::latest_profile_version(&tx, student_id)? + 1;
            let profile = draft.clone().into_profile(
                student_id,
                version,
                Some(assessment.id.clone()),
                generated_profile.clone(),
                Utc::now(),
            );
            repository::insert_profile(&tx, &profile)?;

            let mut completed = assessment.clone();
            completed.status = AssessmentStatus::Completed;
            completed.completed_at = Some(profile.created_at);
            completed.current_question_index = completed.total_questions;
            completed.generated_profile_id = Some(profile.id.clone());
            completed.updated_at = profile.created_at;
            repository::save_assessment(&tx, &completed)?;
            tx.commit()?;
            Ok(profile)
        });

        match written {
            Ok(profile) => {
                info!(
                    "[Profile] Student {} profile v{} created (summary: {})",
                    student_id,
                    profile.version,
                    profile.generated_profile.is_some()
                );
                Ok(profile)
            }
            Err(err) => {
                // Leave the assessment resubmittable rather than stuck in PROCESSING
                assessment.status = previous_status;
                if let Err(revert) = self
                    .store
                    .with_conn(|conn| repository::save_assessment(conn, &assessment))
                {
                    warn!("[Profile] Could not revert assessment for {}: {}", student_id, revert);
                }
                Err(err)
            }
        }
    }

    /// COMPLETED -> NOT_STARTED. The current profile stays until superseded.
    pub fn retake_assessment(&self, actor: &Actor) -> Result<Assessment> {
        require_student(actor)?;
        let mut assessment = self.load_or_new_assessment(&actor.user_id)?;
        if assessment.status != AssessmentStatus::Completed {
            return Err(EngineError::state(
                "Assessment",
                assessment.status.as_str(),
                "retake",
            ));
        }
        assessment.status = AssessmentStatus::NotStarted;
        assessment.answers.clear();
        assessment.current_question_index = 0;
        assessment.started_at = None;
        assessment.completed_at = None;
        assessment.updated_at = Utc::now();
        self.store
            .with_conn(|conn| repository::save_assessment(conn, &assessment))?;
        info!("[Profile] Assessment reset for retake by {}", actor.user_id);
        Ok(assessment)
    }

    pub fn current_profile(&self, student_id: &str) -> Result<NeuroProfile> {
        self.store
            .with_conn(|conn| repository::current_profile(conn, student_id))?
            .ok_or_else(|| EngineError::not_found("NeuroProfile", student_id))
    }

    pub fn profile_history(&self, student_id: &str) -> Result<Vec<NeuroProfile>> {
        self.store
            .with_conn(|conn| repository::profile_history(conn, student_id))
    }

    // --- Lessons ---

    pub fn create_lesson(&self, actor: &Actor, new: NewLesson) -> Result<Lesson> {
        if actor.role != Role::Teacher {
            return Err(EngineError::validation("role", "only teachers author lessons"));
        }
        if new.title.trim().is_empty() {
            return Err(EngineError::validation("title", "must not be empty"));
        }
        if new.original_text_content.trim().is_empty() {
            return Err(EngineError::validation(
                "original_text_content",
                "must not be empty",
            ));
        }

        let now = Utc::now();
        let lesson = Lesson {
            id: uuid::Uuid::new_v4().to_string(),
            teacher_id: actor.user_id.clone(),
            school_id: new.school_id.or_else(|| actor.school_id.clone()),
            title: new.title.trim().to_string(),
            description: new.description,
            subject: new.subject,
            original_text_content: new.original_text_content,
            media_url: new.media_url,
            status: LessonStatus::Draft,
            content_version: 1,
            adaptation_count: 0,
            created_at: now,
            updated_at: now,
            published_at: None,
        };
        self.store
            .with_conn(|conn| repository::insert_lesson(conn, &lesson))?;
        info!("[Lesson] {} created by {}", lesson.id, actor.user_id);
        Ok(lesson)
    }

    pub fn get_lesson(&self, lesson_id: &str) -> Result<Lesson> {
        self.store
            .with_conn(|conn| repository::get_lesson(conn, lesson_id))?
            .ok_or_else(|| EngineError::not_found("Lesson", lesson_id))
    }

    pub fn update_lesson_content(&self, actor: &Actor, lesson_id: &str, text: &str) -> Result<Lesson> {
        let mut lesson = self.authored_lesson(actor, lesson_id)?;
        if lesson.status != LessonStatus::Draft {
            return Err(EngineError::state("Lesson", lesson.status.as_str(), "edit"));
        }
        lesson.original_text_content = non_empty_text(text)?;
        self.save_lesson(lesson)
    }

    pub fn publish_lesson(&self, actor: &Actor, lesson_id: &str) -> Result<Lesson> {
        let mut lesson = self.authored_lesson(actor, lesson_id)?;
        if lesson.status != LessonStatus::Draft {
            return Err(EngineError::state("Lesson", lesson.status.as_str(), "publish"));
        }
        lesson.status = LessonStatus::Published;
        lesson.published_at = Some(Utc::now());
        self.save_lesson(lesson)
    }

    /// Replaces published text and bumps `content_version`, which outdates
    /// every cached adaptation of the lesson.
    pub fn republish_lesson(&self, actor: &Actor, lesson_id: &str, text: &str) -> Result<Lesson> {
        let mut lesson = self.authored_lesson(actor, lesson_id)?;
        if lesson.status != LessonStatus::Published {
            return Err(EngineError::state(
                "Lesson",
                lesson.status.as_str(),
                "republish",
            ));
        }
        lesson.original_text_content = non_empty_text(text)?;
        lesson.content_version += 1;
        lesson.published_at = Some(Utc::now());
        info!(
            "[Lesson] {} republished as content v{}",
            lesson.id, lesson.content_version
        );
        self.save_lesson(lesson)
    }

    pub fn archive_lesson(&self, actor: &Actor, lesson_id: &str) -> Result<Lesson> {
        let mut lesson = self.authored_lesson(actor, lesson_id)?;
        if lesson.status == LessonStatus::Archived {
            return Err(EngineError::state("Lesson", lesson.status.as_str(), "archive"));
        }
        lesson.status = LessonStatus::Archived;
        self.save_lesson(lesson)
    }

    // --- Adaptations ---

    /// Lesson-play entry point: cached adaptation or a single-flight generation.
    pub fn get_adapted_lesson(&self, actor: &Actor, lesson_id: &str) -> Result<PlayOutcome> {
        require_student(actor)?;
        let lesson = self.get_lesson(lesson_id)?;
        if lesson.status != LessonStatus::Published {
            return Err(EngineError::state("Lesson", lesson.status.as_str(), "play"));
        }
        let profile = self.current_profile(&actor.user_id)?;

        AdaptationCache::new(&self.store, &self.model, &self.config).get_or_create(&lesson, &profile)
    }

    pub fn get_adaptation(&self, adapted_lesson_id: &str) -> Result<AdaptedLesson> {
        self.store
            .with_conn(|conn| repository::get_adaptation(conn, adapted_lesson_id))?
            .ok_or_else(|| EngineError::not_found("AdaptedLesson", adapted_lesson_id))
    }

    pub fn adaptation_history(&self, adapted_lesson_id: &str) -> Result<Vec<AdaptationRevision>> {
        self.get_adaptation(adapted_lesson_id)?;
        self.store
            .with_conn(|conn| repository::list_adaptation_revisions(conn, adapted_lesson_id))
    }

    // --- Feedback ---

    pub fn record_feedback(
        &self,
        actor: &Actor,
        adapted_lesson_id: &str,
        block_id: &str,
        correction_text: &str,
        correction_type: CorrectionType,
        notes: Option<&str>,
    ) -> Result<TrainingDataLog> {
        self.store.with_conn(|conn| {
            feedback::record_correction(
                conn,
                actor,
                adapted_lesson_id,
                block_id,
                correction_text,
                correction_type,
                notes,
                Utc::now(),
            )
        })
    }

    pub fn training_logs_for(&self, adapted_lesson_id: &str) -> Result<Vec<TrainingDataLog>> {
        self.store
            .with_conn(|conn| repository::list_training_logs_for_source(conn, adapted_lesson_id))
    }

    pub fn prepare_training_batch(&self, limit: usize) -> Result<TrainingBatch> {
        self.store
            .with_conn(|conn| feedback::prepare_training_batch(conn, limit, Utc::now()))
    }

    pub fn training_stats(&self) -> Result<TrainingStats> {
        self.store.with_conn(feedback::training_stats)
    }

    // --- Progress ---

    pub fn update_progress(&self, actor: &Actor, update: &ProgressUpdate) -> Result<StudentProgress> {
        require_student(actor)?;
        let student_id = actor.user_id.as_str();
        self.store.with_conn(|conn| {
            if repository::get_lesson(conn, &update.lesson_id)?.is_none() {
                return Err(EngineError::not_found("Lesson", update.lesson_id.as_str()));
            }
            let total_blocks = repository::find_adaptation(conn, &update.lesson_id, student_id)?
                .filter(|a| a.status == AdaptationStatus::Ready)
                .map(|a| a.content_blocks.len() as u32);
            progress::record(conn, student_id, update, total_blocks, Utc::now())
        })
    }

    pub fn get_progress(&self, student_id: &str) -> Result<StudentProgress> {
        self.store
            .with_conn(|conn| progress::snapshot(conn, student_id))
    }

    // --- Internal Helpers ---

    fn load_or_new_assessment(&self, student_id: &str) -> Result<Assessment> {
        let total = self.get_questions()?.len() as u32;
        let existing = self
            .store
            .with_conn(|conn| repository::find_assessment(conn, student_id))?;
        match existing {
            Some(assessment) => Ok(assessment),
            None => {
                let assessment = Assessment::new(student_id, total, Utc::now());
                self.store
                    .with_conn(|conn| repository::save_assessment(conn, &assessment))?;
                Ok(assessment)
            }
        }
    }

    fn enrich_profile(
        &self,
        student_id: &str,
        questions: &[Question],
        answers: &[Answer],
        draft: &profile::ProfileDraft,
    ) -> Option<String> {
        let request = profile::summary_request(student_id, questions, answers, draft);
        let model = Arc::clone(&self.model);
        match call_bounded(self.config.enrichment_timeout(), move || {
            model.summarize_profile(&request)
        }) {
            Ok(summary) if !summary.trim().is_empty() => Some(summary),
            Ok(_) => None,
            Err(err) => {
                warn!("[Profile] Enrichment skipped for {}: {}", student_id, err);
                None
            }
        }
    }

    fn authored_lesson(&self, actor: &Actor, lesson_id: &str) -> Result<Lesson> {
        let lesson = self.get_lesson(lesson_id)?;
        if lesson.teacher_id != actor.user_id {
            return Err(EngineError::validation(
                "teacher_id",
                "only the authoring teacher may change this lesson",
            ));
        }
        Ok(lesson)
    }

    fn save_lesson(&self, mut lesson: Lesson) -> Result<Lesson> {
        lesson.updated_at = Utc::now();
        self.store
            .with_conn(|conn| repository::update_lesson(conn, &lesson))?;
        Ok(lesson)
    }
}

fn require_student(actor: &Actor) -> Result<()> {
    if actor.role != Role::Student {
        return Err(EngineError::validation(
            "role",
            format!("operation requires a student, got {}", actor.role),
        ));
    }
    Ok(())
}

fn non_empty_text(text: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(EngineError::validation(
            "original_text_content",
            "must not be empty",
        ));
    }
    Ok(text.to_string())
}
