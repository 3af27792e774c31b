// src/profile.rs

//! Derives a `NeuroProfile` from onboarding assessment answers.
//!
//! Every category maps to one profile dimension through a deterministic
//! transform. The generative model may add a qualitative summary on top, but
//! the deterministic profile never depends on it.

use crate::config::EngineConfig;
use crate::constants::*;
use crate::error::{EngineError, Result};
use crate::model::ProfileSummaryRequest;
use crate::models::{
    Answer, AnswerValue, ComplexityTolerance, LearningStyle, NeuroProfile, Question,
    QuestionCategory, QuestionType, ReadingLevel,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

const DEFAULT_READING_LEVEL: ReadingLevel = ReadingLevel::Grade3;
const DEFAULT_CONFIDENCE_DIMENSION: &str = "confidence";

/// Option text -> learning style. Anything else falls back to MULTIMODAL.
const LEARNING_STYLE_TABLE: &[(&str, LearningStyle)] = &[
    ("watching videos or looking at pictures", LearningStyle::Visual),
    ("seeing diagrams, images, or examples", LearningStyle::Visual),
    ("listening to someone explain it", LearningStyle::Auditory),
    ("listening to audio or discussions", LearningStyle::Auditory),
    ("trying it out with my hands", LearningStyle::Kinesthetic),
    ("trying it out step by step", LearningStyle::Kinesthetic),
    ("learning by doing immediately", LearningStyle::Kinesthetic),
    ("reading and writing notes", LearningStyle::ReadingWriting),
    ("reading it quietly on my own", LearningStyle::ReadingWriting),
];

/// Deterministic profile attributes, before versioning and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub learning_style: LearningStyle,
    pub reading_level: ReadingLevel,
    pub complexity_tolerance: ComplexityTolerance,
    pub attention_span_minutes: u32,
    pub sensory_triggers: Vec<String>,
    pub interests: Vec<String>,
    pub confidence_scores: BTreeMap<String, f64>,
}

impl ProfileDraft {
    pub fn into_profile(
        self,
        student_id: &str,
        version: u32,
        assessment_id: Option<String>,
        generated_profile: Option<String>,
        now: DateTime<Utc>,
    ) -> NeuroProfile {
        NeuroProfile {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            version,
            learning_style: self.learning_style,
            reading_level: self.reading_level,
            complexity_tolerance: self.complexity_tolerance,
            attention_span_minutes: self.attention_span_minutes,
            sensory_triggers: self.sensory_triggers,
            interests: self.interests,
            confidence_scores: self.confidence_scores,
            generated_profile,
            assessment_id,
            created_at: now,
        }
    }
}

// --- Public Interface ---

/// Checks a single answer against its question's declared shape.
pub fn validate_answer(question: &Question, value: &AnswerValue) -> Result<()> {
    let field = format!("question_{}", question.id);
    match (question.question_type, value) {
        (QuestionType::SingleChoice, AnswerValue::Choice(choice)) => {
            if option_index(question, choice).is_none() {
                return Err(EngineError::validation(
                    field,
                    format!("'{}' is not one of the declared options", choice),
                ));
            }
        }
        (QuestionType::MultipleChoice, AnswerValue::Choices(choices)) => {
            if let Some(bad) = choices.iter().find(|c| option_index(question, c).is_none()) {
                return Err(EngineError::validation(
                    field,
                    format!("'{}' is not one of the declared options", bad),
                ));
            }
        }
        (QuestionType::MultipleChoice, AnswerValue::Choice(choice)) => {
            if option_index(question, choice).is_none() {
                return Err(EngineError::validation(
                    field,
                    format!("'{}' is not one of the declared options", choice),
                ));
            }
        }
        (QuestionType::Scale, AnswerValue::Scale(v)) => {
            if *v < question.scale_min || *v > question.scale_max {
                return Err(EngineError::validation(
                    field,
                    format!(
                        "{} is outside the range {}..={}",
                        v, question.scale_min, question.scale_max
                    ),
                ));
            }
        }
        (QuestionType::TextInput, AnswerValue::Choice(text)) => {
            if text.trim().is_empty() {
                return Err(EngineError::validation(field, "answer text is empty"));
            }
        }
        (expected, _) => {
            return Err(EngineError::validation(
                field,
                format!("answer shape does not match a {} question", expected),
            ));
        }
    }
    Ok(())
}

/// Maps a complete answer set to profile attributes.
///
/// Fails with `Validation` if a required question or category is unanswered,
/// an answer references an unknown question, or a value is out of range.
pub fn build(
    questions: &[Question],
    answers: &[Answer],
    config: &EngineConfig,
) -> Result<ProfileDraft> {
    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    // Last answer per question wins
    let mut answered: HashMap<i64, &AnswerValue> = HashMap::new();
    for a in answers {
        let question = by_id.get(&a.question_id).ok_or_else(|| {
            EngineError::validation(
                format!("question_{}", a.question_id),
                "answer references an unknown question",
            )
        })?;
        validate_answer(question, &a.value)?;
        answered.insert(a.question_id, &a.value);
    }

    ensure_complete(questions, &answered)?;

    let mut ordered: Vec<&Question> = questions.iter().collect();
    ordered.sort_by_key(|q| (q.order, q.id));
    let in_category = |category| answers_in(&ordered, &answered, category);

    let mut confidence_scores = BTreeMap::new();

    // 1. Learning style (lookup table, MULTIMODAL fallback)
    let (learning_style, style_confidence) = in_category(QuestionCategory::LearningStyle)
        .first()
        .and_then(|(_, v)| first_text(v))
        .map(|text| match map_learning_style(&text) {
            Some(style) => (style, CONFIDENCE_MAPPED),
            None => {
                debug!("[Profile] Unmapped learning style answer '{}', using multimodal", text);
                (LearningStyle::Multimodal, CONFIDENCE_FALLBACK)
            }
        })
        .unwrap_or((LearningStyle::Multimodal, CONFIDENCE_FALLBACK));
    confidence_scores.insert("learning_style".to_string(), style_confidence);

    // 2. Attention span (bucket midpoint)
    let (attention_span_minutes, span_confidence) = in_category(QuestionCategory::AttentionSpan)
        .first()
        .and_then(|(_, v)| match v {
            AnswerValue::Scale(minutes) => u32::try_from(*minutes).ok().filter(|m| *m > 0),
            other => first_text(other).and_then(|t| attention_bucket_minutes(&t)),
        })
        .map(|minutes| (minutes, CONFIDENCE_MAPPED))
        .unwrap_or((config.default_attention_span_minutes, CONFIDENCE_FALLBACK));
    confidence_scores.insert("attention_span".to_string(), span_confidence);

    // 3. Complexity tolerance (mean normalized score, bucketed)
    let complexity_scores: Vec<f64> = in_category(QuestionCategory::ComplexityPreference)
        .iter()
        .filter_map(|(q, v)| normalized_score(q, v))
        .collect();
    let complexity_tolerance = if complexity_scores.is_empty() {
        ComplexityTolerance::Medium
    } else {
        let mean = complexity_scores.iter().sum::<f64>() / complexity_scores.len() as f64;
        bucket_complexity(mean, config)
    };

    // 4. Reading level
    let (reading_level, reading_confidence) = in_category(QuestionCategory::ReadingLevel)
        .first()
        .and_then(|(_, v)| first_text(v))
        .and_then(|text| ReadingLevel::from_label(&text))
        .map(|level| (level, CONFIDENCE_MAPPED))
        .unwrap_or((DEFAULT_READING_LEVEL, CONFIDENCE_FALLBACK));
    confidence_scores.insert("reading_level".to_string(), reading_confidence);

    // 5. Multi-choice sets, verbatim and deduplicated
    let sensory_triggers = collect_choices(&in_category(QuestionCategory::SensoryTriggers), None);
    let interests = collect_choices(
        &in_category(QuestionCategory::Interests),
        Some(config.max_interests),
    );

    // 6. Self-reported confidence per dimension
    for (q, v) in in_category(QuestionCategory::Confidence) {
        if let Some(score) = normalized_score(q, v) {
            let key = q
                .dimension
                .clone()
                .unwrap_or_else(|| DEFAULT_CONFIDENCE_DIMENSION.to_string());
            confidence_scores.insert(key, score);
        }
    }

    let draft = ProfileDraft {
        learning_style,
        reading_level,
        complexity_tolerance,
        attention_span_minutes,
        sensory_triggers,
        interests,
        confidence_scores,
    };
    info!(
        "[Profile Result] style={}, complexity={}, span={}m, reading={}",
        draft.learning_style,
        draft.complexity_tolerance,
        draft.attention_span_minutes,
        draft.reading_level
    );
    Ok(draft)
}

pub fn summary_request(
    student_id: &str,
    questions: &[Question],
    answers: &[Answer],
    draft: &ProfileDraft,
) -> ProfileSummaryRequest {
    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let answers = answers
        .iter()
        .map(|a| {
            let text = by_id
                .get(&a.question_id)
                .map(|q| q.text.clone())
                .unwrap_or_else(|| format!("question {}", a.question_id));
            let value = serde_json::to_value(&a.value).unwrap_or(serde_json::Value::Null);
            (text, value)
        })
        .collect();

    ProfileSummaryRequest {
        student_id: student_id.to_string(),
        answers,
        learning_style: draft.learning_style,
        complexity_tolerance: draft.complexity_tolerance,
        attention_span_minutes: draft.attention_span_minutes,
    }
}

pub fn map_learning_style(option: &str) -> Option<LearningStyle> {
    let needle = option.trim().to_lowercase();
    LEARNING_STYLE_TABLE
        .iter()
        .find(|(text, _)| *text == needle)
        .map(|(_, style)| *style)
}

/// Midpoint of a duration bucket such as "10-20 minutes".
pub fn attention_bucket_minutes(text: &str) -> Option<u32> {
    let lower = text.to_lowercase();
    let numbers: Vec<u32> = lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    let minutes = match numbers.as_slice() {
        [low, high, ..] => (low + high) / 2,
        [n] if lower.contains("less") || lower.contains("under") => (n / 2).max(1),
        [n] if lower.contains("more") || lower.contains("over") => {
            n + ATTENTION_OPEN_BUCKET_EXTRA_MINUTES
        }
        [n] => *n,
        [] => return None,
    };
    (minutes > 0).then_some(minutes)
}

pub fn bucket_complexity(normalized: f64, config: &EngineConfig) -> ComplexityTolerance {
    if normalized <= config.complexity_low_threshold {
        ComplexityTolerance::Low
    } else if normalized > config.complexity_high_threshold {
        ComplexityTolerance::High
    } else {
        ComplexityTolerance::Medium
    }
}

// --- Internal Helpers ---

fn ensure_complete(questions: &[Question], answered: &HashMap<i64, &AnswerValue>) -> Result<()> {
    if let Some(missing) = questions
        .iter()
        .find(|q| q.is_required && !answered.contains_key(&q.id))
    {
        return Err(EngineError::validation(
            format!("question_{}", missing.id),
            format!("required {} question is unanswered", missing.category),
        ));
    }

    for category in QuestionCategory::REQUIRED {
        let covered = questions
            .iter()
            .any(|q| q.category == category && answered.contains_key(&q.id));
        if !covered {
            return Err(EngineError::validation(
                category.as_str(),
                "required category has no answer",
            ));
        }
    }
    Ok(())
}

fn answers_in<'a>(
    ordered: &[&'a Question],
    answered: &HashMap<i64, &'a AnswerValue>,
    category: QuestionCategory,
) -> Vec<(&'a Question, &'a AnswerValue)> {
    ordered
        .iter()
        .filter(|q| q.category == category)
        .filter_map(|q| answered.get(&q.id).map(|v| (*q, *v)))
        .collect()
}

fn option_index(question: &Question, choice: &str) -> Option<usize> {
    let needle = choice.trim();
    question
        .options
        .iter()
        .position(|o| o.trim().eq_ignore_ascii_case(needle))
}

fn first_text(value: &AnswerValue) -> Option<String> {
    match value {
        AnswerValue::Choice(s) => Some(s.clone()),
        AnswerValue::Choices(v) => v.first().cloned(),
        AnswerValue::Scale(_) => None,
    }
}

/// Scale position or choice position mapped onto 0..1.
fn normalized_score(question: &Question, value: &AnswerValue) -> Option<f64> {
    match value {
        AnswerValue::Scale(v) => {
            let span = (question.scale_max - question.scale_min) as f64;
            if span <= 0.0 {
                return Some(1.0);
            }
            Some(((*v - question.scale_min) as f64 / span).clamp(0.0, 1.0))
        }
        AnswerValue::Choice(choice) => {
            let idx = option_index(question, choice)?;
            let last = question.options.len().saturating_sub(1);
            if last == 0 {
                return Some(1.0);
            }
            Some(idx as f64 / last as f64)
        }
        AnswerValue::Choices(_) => None,
    }
}

fn collect_choices(answers: &[(&Question, &AnswerValue)], cap: Option<usize>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (_, value) in answers {
        let items: Vec<&String> = match value {
            AnswerValue::Choices(v) => v.iter().collect(),
            AnswerValue::Choice(s) => vec![s],
            AnswerValue::Scale(_) => Vec::new(),
        };
        for item in items {
            let item = item.trim();
            if !item.is_empty() && !out.iter().any(|seen| seen == item) {
                out.push(item.to_string());
            }
        }
    }
    if let Some(cap) = cap {
        out.truncate(cap);
    }
    out
}
