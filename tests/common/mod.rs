// tests/common/mod.rs

#![allow(dead_code)]

use lesson_adapt::model::{GenerationRequest, ProfileSummaryRequest};
use lesson_adapt::models::{Actor, Answer, Lesson, NeuroProfile, NewLesson};
use lesson_adapt::{Engine, EngineConfig, GenerativeModel, ModelError, Store};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const GOOD_OUTPUT: &str = r#"{
  "adaptation_style": "Visual",
  "blocks": [
    {"type": "heading", "content": "How plants eat", "order": 0},
    {"type": "text", "content": "Plants turn sunlight into food.", "emphasis": ["sunlight"], "order": 1},
    {"type": "quiz", "question": "What do plants need?", "options": ["Sunlight", "Noise"], "correct_index": 0, "order": 2},
    {"type": "summary", "content": "Sunlight feeds plants.", "order": 3}
  ]
}"#;

/// Generative model double with scripted replies and a call counter.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    fallback: Result<String, ModelError>,
    summary: Result<String, ModelError>,
    delay: Duration,
    first_delay: Mutex<Option<Duration>>,
    summary_delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn always(output: &str) -> Self {
        ScriptedModel {
            replies: Mutex::new(VecDeque::new()),
            fallback: Ok(output.to_string()),
            summary: Ok("Prefers pictures and short sessions.".to_string()),
            delay: Duration::ZERO,
            first_delay: Mutex::new(None),
            summary_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, reply: Result<&str, ModelError>) -> Self {
        self.replies.lock().push_back(reply.map(str::to_string));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Only the first generation call sleeps for `delay`.
    pub fn slow_once(self, delay: Duration) -> Self {
        *self.first_delay.lock() = Some(delay);
        self
    }

    pub fn with_summary_delay(mut self, delay: Duration) -> Self {
        self.summary_delay = delay;
        self
    }

    pub fn with_summary(mut self, summary: Result<&str, ModelError>) -> Self {
        self.summary = summary.map(str::to_string);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerativeModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted-model"
    }

    fn adapt_lesson(&self, _request: &GenerationRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pause = self.first_delay.lock().take().unwrap_or(self.delay);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn summarize_profile(&self, _request: &ProfileSummaryRequest) -> Result<String, ModelError> {
        if !self.summary_delay.is_zero() {
            thread::sleep(self.summary_delay);
        }
        self.summary.clone()
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        generation_timeout_ms: 5_000,
        enrichment_timeout_ms: 1_000,
        claim_wait_timeout_ms: 5_000,
        claim_poll_interval_ms: 10,
        retry_hint_ms: 1_000,
        ..EngineConfig::default()
    }
}

pub fn engine(model: &Arc<ScriptedModel>) -> Engine {
    engine_on(Store::open_in_memory().unwrap(), model, test_config())
}

pub fn engine_on(store: Store, model: &Arc<ScriptedModel>, config: EngineConfig) -> Engine {
    let model: Arc<dyn GenerativeModel> = model.clone();
    Engine::new(store, model, config).unwrap()
}

pub fn teacher() -> Actor {
    Actor::teacher("teacher-1")
}

pub fn student(id: &str) -> Actor {
    Actor::student(id)
}

pub fn full_answers() -> Vec<Answer> {
    vec![
        Answer::choice(1, "Watching videos or looking at pictures"),
        Answer::choices(2, &["Loud sounds", "Flashing content"]),
        Answer::choice(3, "10-20 minutes"),
        Answer::scale(4, 3),
        Answer::choices(5, &["Space", "Animals"]),
        Answer::choice(6, "Grade 4"),
        Answer::scale(7, 4),
    ]
}

pub fn onboard(engine: &Engine, actor: &Actor) -> NeuroProfile {
    engine.submit_assessment(actor, &full_answers()).unwrap()
}

pub fn published_lesson(engine: &Engine) -> Lesson {
    let lesson = engine
        .create_lesson(
            &teacher(),
            NewLesson {
                title: "Photosynthesis".into(),
                original_text_content: "Plants use sunlight, water and air to make sugar.".into(),
                subject: Some("Science".into()),
                ..NewLesson::default()
            },
        )
        .unwrap();
    engine.publish_lesson(&teacher(), &lesson.id).unwrap()
}
