// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Enums persisted as lowercase text. Generates `as_str`, `FromStr` and `Display`.
macro_rules! text_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// --- Identity ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    SchoolAdmin,
    Parent,
    SuperAdmin,
}

text_enum!(Role, "role" {
    Student => "student",
    Teacher => "teacher",
    SchoolAdmin => "school_admin",
    Parent => "parent",
    SuperAdmin => "super_admin",
});

/// Authenticated caller as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub school_id: Option<String>,
}

impl Actor {
    pub fn student(user_id: &str) -> Self {
        Actor {
            user_id: user_id.to_string(),
            role: Role::Student,
            school_id: None,
        }
    }

    pub fn teacher(user_id: &str) -> Self {
        Actor {
            user_id: user_id.to_string(),
            role: Role::Teacher,
            school_id: None,
        }
    }
}

// --- Profile Dimensions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Kinesthetic,
    ReadingWriting,
    Multimodal,
}

text_enum!(LearningStyle, "learning style" {
    Visual => "visual",
    Auditory => "auditory",
    Kinesthetic => "kinesthetic",
    ReadingWriting => "reading_writing",
    Multimodal => "multimodal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingLevel {
    PreK,
    Grade1,
    Grade2,
    Grade3,
    Grade4,
    Grade5,
    Grade6,
    Grade7,
    Grade8,
    HighSchool,
}

text_enum!(ReadingLevel, "reading level" {
    PreK => "pre_k",
    Grade1 => "grade_1",
    Grade2 => "grade_2",
    Grade3 => "grade_3",
    Grade4 => "grade_4",
    Grade5 => "grade_5",
    Grade6 => "grade_6",
    Grade7 => "grade_7",
    Grade8 => "grade_8",
    HighSchool => "high_school",
});

impl ReadingLevel {
    /// Parses human labels such as "Pre-K", "Grade 3" or "High school".
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        ReadingLevel::from_str(&normalized).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTolerance {
    Low,
    Medium,
    High,
}

text_enum!(ComplexityTolerance, "complexity tolerance" {
    Low => "low",
    Medium => "medium",
    High => "high",
});

// --- Assessment ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    Scale,
    TextInput,
}

text_enum!(QuestionType, "question type" {
    SingleChoice => "single_choice",
    MultipleChoice => "multiple_choice",
    Scale => "scale",
    TextInput => "text_input",
});

/// Profile dimension a question feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    LearningStyle,
    SensoryTriggers,
    AttentionSpan,
    ComplexityPreference,
    Interests,
    ReadingLevel,
    Confidence,
}

text_enum!(QuestionCategory, "question category" {
    LearningStyle => "learning_style",
    SensoryTriggers => "sensory_triggers",
    AttentionSpan => "attention_span",
    ComplexityPreference => "complexity_preference",
    Interests => "interests",
    ReadingLevel => "reading_level",
    Confidence => "confidence",
});

impl QuestionCategory {
    pub const REQUIRED: [QuestionCategory; 7] = [
        QuestionCategory::LearningStyle,
        QuestionCategory::SensoryTriggers,
        QuestionCategory::AttentionSpan,
        QuestionCategory::ComplexityPreference,
        QuestionCategory::Interests,
        QuestionCategory::ReadingLevel,
        QuestionCategory::Confidence,
    ];
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub category: QuestionCategory,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_scale_min")]
    pub scale_min: i64,
    #[serde(default = "default_scale_max")]
    pub scale_max: i64,
    #[serde(default = "default_true")]
    pub is_required: bool,
    pub order: i64,
    /// Key under which a confidence answer is recorded
    #[serde(default)]
    pub dimension: Option<String>,
}

fn default_scale_min() -> i64 {
    1
}

fn default_scale_max() -> i64 {
    5
}

fn default_true() -> bool {
    true
}

/// Raw answer payload; shape depends on the question type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Scale(i64),
    Choice(String),
    Choices(Vec<String>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Answer {
    pub question_id: i64,
    pub value: AnswerValue,
}

impl Answer {
    pub fn choice(question_id: i64, value: &str) -> Self {
        Answer {
            question_id,
            value: AnswerValue::Choice(value.to_string()),
        }
    }

    pub fn choices(question_id: i64, values: &[&str]) -> Self {
        Answer {
            question_id,
            value: AnswerValue::Choices(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    pub fn scale(question_id: i64, value: i64) -> Self {
        Answer {
            question_id,
            value: AnswerValue::Scale(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    NotStarted,
    InProgress,
    Processing,
    Completed,
}

text_enum!(AssessmentStatus, "assessment status" {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Processing => "processing",
    Completed => "completed",
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Assessment {
    pub id: String,
    pub student_id: String,
    pub status: AssessmentStatus,
    pub answers: Vec<Answer>,
    pub current_question_index: u32,
    pub total_questions: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub generated_profile_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assessment {
    pub fn new(student_id: &str, total_questions: u32, now: DateTime<Utc>) -> Self {
        Assessment {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            status: AssessmentStatus::NotStarted,
            answers: Vec::new(),
            current_question_index: 0,
            total_questions,
            started_at: None,
            completed_at: None,
            generated_profile_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces any previous answer to the same question, keeping first position.
    pub fn record_answer(&mut self, answer: Answer) {
        match self
            .answers
            .iter_mut()
            .find(|a| a.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_questions == 0 {
            return 0.0;
        }
        (self.current_question_index as f64 / self.total_questions as f64) * 100.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NeuroProfile {
    pub id: String,
    pub student_id: String,
    pub version: u32,
    pub learning_style: LearningStyle,
    pub reading_level: ReadingLevel,
    pub complexity_tolerance: ComplexityTolerance,
    pub attention_span_minutes: u32,
    pub sensory_triggers: Vec<String>,
    pub interests: Vec<String>,
    pub confidence_scores: BTreeMap<String, f64>,
    /// Best-effort qualitative summary from the generative model
    pub generated_profile: Option<String>,
    pub assessment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Lessons ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Draft,
    Published,
    Archived,
}

text_enum!(LessonStatus, "lesson status" {
    Draft => "draft",
    Published => "published",
    Archived => "archived",
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lesson {
    pub id: String,
    pub teacher_id: String,
    pub school_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub original_text_content: String,
    pub media_url: Option<String>,
    pub status: LessonStatus,
    /// Bumped on every republish; cached adaptations compare against it
    pub content_version: u32,
    pub adaptation_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NewLesson {
    pub title: String,
    pub original_text_content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub school_id: Option<String>,
}

// --- Adaptations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

text_enum!(AdaptationStatus, "adaptation status" {
    Pending => "pending",
    Generating => "generating",
    Ready => "ready",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Heading,
    Text,
    Image,
    ImagePrompt,
    Quiz,
    Activity,
    Summary,
}

text_enum!(BlockType, "block type" {
    Heading => "heading",
    Text => "text",
    Image => "image",
    ImagePrompt => "image_prompt",
    Quiz => "quiz",
    Activity => "activity",
    Summary => "summary",
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub order: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emphasis: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdaptedLesson {
    pub id: String,
    pub lesson_id: String,
    pub student_id: String,
    pub lesson_title: String,
    pub adaptation_style: Option<String>,
    pub status: AdaptationStatus,
    pub content_blocks: Vec<ContentBlock>,
    pub lesson_version: u32,
    pub profile_version: u32,
    /// Claim counter; fences writes from superseded generation attempts
    pub attempt: u32,
    pub ai_model_used: Option<String>,
    pub generation_duration_ms: Option<u64>,
    pub failure_reason: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub generated_at: Option<DateTime<Utc>>,
    pub view_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdaptedLesson {
    pub fn find_block(&self, block_id: &str) -> Option<&ContentBlock> {
        self.content_blocks.iter().find(|b| b.id == block_id)
    }
}

/// Snapshot of a READY adaptation taken before it was superseded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdaptationRevision {
    pub adapted_lesson_id: String,
    pub attempt: u32,
    pub lesson_version: u32,
    pub profile_version: u32,
    pub adaptation_style: Option<String>,
    pub content_blocks: Vec<ContentBlock>,
    pub ai_model_used: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub superseded_at: DateTime<Utc>,
}

// --- Progress ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

text_enum!(ProgressStatus, "progress status" {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Completed => "completed",
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonProgress {
    pub lesson_id: String,
    pub status: ProgressStatus,
    pub blocks_completed: u32,
    pub total_blocks: u32,
    pub time_spent_seconds: u64,
    pub score: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    pub fn new(lesson_id: &str) -> Self {
        LessonProgress {
            lesson_id: lesson_id.to_string(),
            status: ProgressStatus::NotStarted,
            blocks_completed: 0,
            total_blocks: 0,
            time_spent_seconds: 0,
            score: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        (self.blocks_completed as f64 / self.total_blocks as f64) * 100.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentProgress {
    pub student_id: String,
    pub total_lessons_completed: u32,
    pub total_time_spent_seconds: u64,
    pub average_score: f64,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_lesson_id: Option<String>,
    pub lessons: BTreeMap<String, LessonProgress>,
}

impl StudentProgress {
    pub fn new(student_id: &str) -> Self {
        StudentProgress {
            student_id: student_id.to_string(),
            total_lessons_completed: 0,
            total_time_spent_seconds: 0,
            average_score: 0.0,
            current_streak_days: 0,
            longest_streak_days: 0,
            last_activity_at: None,
            last_lesson_id: None,
            lessons: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub lesson_id: String,
    pub blocks_completed: u32,
    /// Caller's cumulative figure for this lesson
    pub time_spent_seconds: u64,
    #[serde(default)]
    pub quiz_score: Option<f64>,
    #[serde(default)]
    pub is_completed: bool,
}

// --- Training Data ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    Content,
    Structure,
    Style,
}

text_enum!(CorrectionType, "correction type" {
    Content => "content",
    Structure => "structure",
    Style => "style",
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingDataLog {
    pub id: String,
    pub source_id: String,
    pub source_type: String,
    pub block_id: Option<String>,
    pub model_name: String,
    pub input_context: serde_json::Value,
    pub model_output: serde_json::Value,
    pub human_correction: Option<serde_json::Value>,
    pub was_accepted: bool,
    pub corrected_by_user_id: Option<String>,
    pub correction_type: Option<CorrectionType>,
    pub correction_notes: Option<String>,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub training_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrainingDataLog {
    pub fn has_correction(&self) -> bool {
        self.human_correction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_level_labels_parse() {
        assert_eq!(ReadingLevel::from_label("Pre-K"), Some(ReadingLevel::PreK));
        assert_eq!(ReadingLevel::from_label("Grade 3"), Some(ReadingLevel::Grade3));
        assert_eq!(
            ReadingLevel::from_label("High school"),
            Some(ReadingLevel::HighSchool)
        );
        assert_eq!(ReadingLevel::from_label("college"), None);
        assert!(ReadingLevel::Grade2 < ReadingLevel::Grade5);
    }

    #[test]
    fn answer_values_deserialize_by_shape() {
        let answers: Vec<Answer> = serde_json::from_str(
            r#"[{"question_id":1,"value":"Quiet"},{"question_id":2,"value":["a","b"]},{"question_id":3,"value":4}]"#,
        )
        .unwrap();
        assert_eq!(answers[0].value, AnswerValue::Choice("Quiet".into()));
        assert_eq!(
            answers[1].value,
            AnswerValue::Choices(vec!["a".into(), "b".into()])
        );
        assert_eq!(answers[2].value, AnswerValue::Scale(4));
    }

    #[test]
    fn block_type_round_trips_through_text() {
        assert_eq!(BlockType::from_str("image_prompt"), Ok(BlockType::ImagePrompt));
        assert!(BlockType::from_str("video").is_err());
        assert_eq!(BlockType::Summary.to_string(), "summary");
    }
}
