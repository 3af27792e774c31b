// src/model.rs

use crate::error::ModelError;
use crate::models::{ComplexityTolerance, LearningStyle, ReadingLevel};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Everything the model sees when adapting one lesson for one student.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub lesson_title: String,
    pub lesson_text: String,
    pub media_url: Option<String>,
    pub learning_style: LearningStyle,
    pub reading_level: ReadingLevel,
    pub complexity_tolerance: ComplexityTolerance,
    pub attention_span_minutes: u32,
    /// Content the adaptation must avoid
    pub avoid: Vec<String>,
    pub interests: Vec<String>,
    pub max_blocks: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProfileSummaryRequest {
    pub student_id: String,
    /// Question text paired with the raw answer
    pub answers: Vec<(String, serde_json::Value)>,
    pub learning_style: LearningStyle,
    pub complexity_tolerance: ComplexityTolerance,
    pub attention_span_minutes: u32,
}

/// Remote text-generation service. Implementations may block; callers bound
/// every invocation with [`call_bounded`].
pub trait GenerativeModel: Send + Sync {
    fn name(&self) -> &str;

    /// Raw output expected to hold a JSON object with a `blocks` array.
    fn adapt_lesson(&self, request: &GenerationRequest) -> Result<String, ModelError>;

    /// Free-text qualitative summary of a learner.
    fn summarize_profile(&self, request: &ProfileSummaryRequest) -> Result<String, ModelError>;
}

/// Runs `f` on a worker thread and gives up after `timeout`.
///
/// A timed-out call keeps running detached; its result is discarded.
pub fn call_bounded<T, F>(timeout: Duration, f: F) -> Result<T, ModelError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ModelError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("model-call".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| ModelError::Unavailable(format!("cannot spawn model call: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ModelError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(ModelError::Unavailable(
            "model call ended without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_call_returns_result() {
        let out = call_bounded(Duration::from_secs(1), || Ok::<_, ModelError>(42)).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn bounded_call_times_out() {
        let err = call_bounded(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok::<_, ModelError>(())
        })
        .unwrap_err();
        assert!(matches!(err, ModelError::Timeout(_)));
    }

    #[test]
    fn panicking_call_is_unavailable() {
        let err = call_bounded::<(), _>(Duration::from_secs(1), || panic!("boom")).unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
    }
}
