// src/generator.rs

//! Turns untrusted model output into an ordered, typed block sequence.
//!
//! The pipeline never mutates a trusted structure in place: raw JSON values go
//! in, a fresh `RepairReport` comes out with the surviving blocks plus a log
//! of what was dropped, demoted or truncated.

use crate::config::EngineConfig;
use crate::constants::*;
use crate::error::{EngineError, Result};
use crate::model::{call_bounded, GenerationRequest, GenerativeModel};
use crate::models::{BlockType, ContentBlock, Lesson, NeuroProfile};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RepairNote {
    /// Position in the raw model output
    pub position: usize,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub blocks: Vec<ContentBlock>,
    pub dropped: Vec<RepairNote>,
    pub demoted: Vec<RepairNote>,
    pub truncated: usize,
}

/// Result of one successful generation attempt.
#[derive(Debug, Clone)]
pub struct Generated {
    pub request: GenerationRequest,
    pub adaptation_style: String,
    pub report: RepairReport,
    pub model_name: String,
    pub duration_ms: u64,
}

// --- Public Interface ---

pub fn build_request(
    lesson: &Lesson,
    profile: &NeuroProfile,
    config: &EngineConfig,
) -> GenerationRequest {
    GenerationRequest {
        lesson_title: lesson.title.clone(),
        lesson_text: lesson
            .original_text_content
            .chars()
            .take(config.max_lesson_content_chars)
            .collect(),
        media_url: lesson.media_url.clone(),
        learning_style: profile.learning_style,
        reading_level: profile.reading_level,
        complexity_tolerance: profile.complexity_tolerance,
        attention_span_minutes: profile.attention_span_minutes,
        avoid: profile.sensory_triggers.clone(),
        interests: profile
            .interests
            .iter()
            .take(MAX_PROMPT_INTERESTS)
            .cloned()
            .collect(),
        max_blocks: config.block_ceiling(profile.attention_span_minutes),
    }
}

/// One model call, then parse and repair. Any failure fails the whole attempt.
pub fn generate(
    model: &Arc<dyn GenerativeModel>,
    lesson: &Lesson,
    profile: &NeuroProfile,
    config: &EngineConfig,
) -> Result<Generated> {
    let request = build_request(lesson, profile, config);
    let started = Instant::now();

    debug!(
        "[Generator] Calling {} for lesson {} (style={}, max_blocks={})",
        model.name(),
        lesson.id,
        request.learning_style,
        request.max_blocks
    );

    let raw = {
        let model = Arc::clone(model);
        let request = request.clone();
        call_bounded(config.generation_timeout(), move || {
            model.adapt_lesson(&request)
        })?
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let (style, raw_blocks) = parse_output(&raw)?;
    let report = repair(raw_blocks, request.max_blocks);
    if report.blocks.is_empty() {
        return Err(EngineError::validation(
            "model_output",
            "no usable blocks after repair",
        ));
    }

    if !report.dropped.is_empty() || !report.demoted.is_empty() || report.truncated > 0 {
        warn!(
            "[Generator] Repaired output for lesson {}: dropped={}, demoted={}, truncated={}",
            lesson.id,
            report.dropped.len(),
            report.demoted.len(),
            report.truncated
        );
    }
    info!(
        "[Generator Result] Lesson {}: {} blocks in {}ms",
        lesson.id,
        report.blocks.len(),
        duration_ms
    );

    Ok(Generated {
        request,
        adaptation_style: style.unwrap_or_else(|| DEFAULT_ADAPTATION_STYLE.to_string()),
        report,
        model_name: model.name().to_string(),
        duration_ms,
    })
}

/// Extracts `(adaptation_style, raw blocks)` from model text.
///
/// Accepts a JSON object with a `blocks` array or a bare array, optionally
/// wrapped in a markdown code fence or surrounded by prose.
pub fn parse_output(raw: &str) -> Result<(Option<String>, Vec<Value>)> {
    let text = strip_code_fence(raw.trim());

    let value = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| extract_between(text, '{', '}'))
        .or_else(|| extract_between(text, '[', ']'))
        .ok_or_else(|| EngineError::validation("model_output", "output is not JSON"))?;

    match value {
        Value::Array(blocks) => Ok((None, blocks)),
        Value::Object(mut obj) => {
            let style = obj
                .get("adaptation_style")
                .and_then(Value::as_str)
                .map(str::to_string);
            match obj.remove("blocks") {
                Some(Value::Array(blocks)) => Ok((style, blocks)),
                _ => Err(EngineError::validation(
                    "model_output",
                    "output has no 'blocks' array",
                )),
            }
        }
        _ => Err(EngineError::validation(
            "model_output",
            "output is neither an object nor an array",
        )),
    }
}

/// Validate-then-normalize pass over raw blocks.
///
/// 1. Drop non-objects, unknown types and empty blocks.
/// 2. Demote malformed QUIZ blocks to TEXT.
/// 3. Truncate to `ceiling`, re-appending a SUMMARY that would be cut.
/// 4. Renumber `order` densely from 0 and assign ids.
pub fn repair(raw_blocks: Vec<Value>, ceiling: usize) -> RepairReport {
    let mut dropped = Vec::new();
    let mut demoted = Vec::new();
    let mut kept: Vec<ContentBlock> = Vec::new();

    for (position, raw) in raw_blocks.into_iter().enumerate() {
        let Value::Object(obj) = raw else {
            dropped.push(note(position, "block is not an object"));
            continue;
        };

        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_default();
        let Ok(block_type) = BlockType::from_str(&type_name) else {
            dropped.push(note(position, &format!("unknown block type '{}'", type_name)));
            continue;
        };

        let block = match block_type {
            BlockType::Quiz => match quiz_block(&obj) {
                Ok(block) => block,
                Err(reason) => {
                    demoted.push(note(position, &reason));
                    demote_quiz(&obj)
                }
            },
            other => plain_block(other, &obj),
        };

        if block.content.trim().is_empty()
            && block.image_url.is_none()
            && block.block_type != BlockType::Quiz
        {
            dropped.push(note(position, "block has no content"));
            continue;
        }
        kept.push(block);
    }

    let before = kept.len();
    let mut blocks = truncate_with_summary(kept, ceiling);
    let truncated = before - blocks.len();

    for (order, block) in blocks.iter_mut().enumerate() {
        block.order = order as u32;
        block.id = format!("block_{}", order);
    }

    RepairReport {
        blocks,
        dropped,
        demoted,
        truncated,
    }
}

// --- Internal Helpers ---

fn note(position: usize, reason: &str) -> RepairNote {
    RepairNote {
        position,
        reason: reason.to_string(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn extract_between(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn plain_block(block_type: BlockType, obj: &Map<String, Value>) -> ContentBlock {
    let content = str_field(obj, "content").unwrap_or_default();
    let image_url = match block_type {
        BlockType::Image | BlockType::ImagePrompt => str_field(obj, "image_url")
            .or_else(|| str_field(obj, "ai_generated_url"))
            .or_else(|| str_field(obj, "url")),
        _ => None,
    };
    let emphasis = emphasis_within(obj, &content);

    ContentBlock {
        id: String::new(),
        block_type,
        order: 0,
        content,
        emphasis,
        image_url,
        question: None,
        options: Vec::new(),
        correct_index: None,
    }
}

/// Keeps emphasis entries that are strings occurring in the content.
fn emphasis_within(obj: &Map<String, Value>, content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(Value::Array(items)) = obj.get("emphasis") {
        for item in items.iter().filter_map(Value::as_str) {
            let item = item.trim();
            if !item.is_empty() && content.contains(item) && !out.iter().any(|e| e == item) {
                out.push(item.to_string());
            }
        }
    }
    out
}

fn quiz_options(obj: &Map<String, Value>) -> Option<Vec<String>> {
    match obj.get("options") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect(),
        _ => None,
    }
}

fn quiz_block(obj: &Map<String, Value>) -> std::result::Result<ContentBlock, String> {
    let content = str_field(obj, "content").unwrap_or_default();
    let question = str_field(obj, "question")
        .or_else(|| (!content.is_empty()).then(|| content.clone()))
        .ok_or("quiz has no question")?;
    let options = quiz_options(obj).ok_or("quiz options are missing or not text")?;
    if options.len() < 2 {
        return Err(format!("quiz has {} option(s), needs at least 2", options.len()));
    }
    let correct_index = obj
        .get("correct_index")
        .and_then(Value::as_u64)
        .ok_or("quiz correct_index is missing or not a non-negative integer")?
        as usize;
    if correct_index >= options.len() {
        return Err(format!(
            "quiz correct_index {} out of bounds for {} options",
            correct_index,
            options.len()
        ));
    }

    Ok(ContentBlock {
        id: String::new(),
        block_type: BlockType::Quiz,
        order: 0,
        emphasis: emphasis_within(obj, &content),
        content,
        image_url: None,
        question: Some(question),
        options,
        correct_index: Some(correct_index),
    })
}

/// Keeps the pedagogical text of a broken quiz without claiming an answer.
fn demote_quiz(obj: &Map<String, Value>) -> ContentBlock {
    let mut parts: Vec<String> = Vec::new();
    if let Some(content) = str_field(obj, "content") {
        parts.push(content);
    }
    if let Some(question) = str_field(obj, "question") {
        if !parts.contains(&question) {
            parts.push(question);
        }
    }
    if let Some(options) = quiz_options(obj) {
        let listed: Vec<String> = options
            .into_iter()
            .filter(|o| !o.is_empty())
            .map(|o| format!("- {}", o))
            .collect();
        if !listed.is_empty() {
            parts.push(listed.join("\n"));
        }
    }

    let mut block = plain_block(BlockType::Text, obj);
    block.content = parts.join("\n\n");
    block.emphasis.retain(|e| block.content.contains(e.as_str()));
    block
}

fn truncate_with_summary(mut blocks: Vec<ContentBlock>, ceiling: usize) -> Vec<ContentBlock> {
    if blocks.len() <= ceiling {
        return blocks;
    }
    let summary_at = blocks
        .iter()
        .rposition(|b| b.block_type == BlockType::Summary);

    match summary_at {
        Some(pos) if pos >= ceiling && ceiling > 0 => {
            let summary = blocks.remove(pos);
            blocks.truncate(ceiling - 1);
            blocks.push(summary);
        }
        _ => blocks.truncate(ceiling),
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders(report: &RepairReport) -> Vec<u32> {
        report.blocks.iter().map(|b| b.order).collect()
    }

    #[test]
    fn renumbers_densely_after_dropping_unknown_types() {
        let raw = vec![
            json!({"type": "heading", "content": "Plants", "order": 7}),
            json!({"type": "video", "content": "not supported"}),
            json!({"type": "TEXT", "content": "Plants need light.", "order": 2}),
            json!("stray string"),
            json!({"type": "summary", "content": "Light feeds plants.", "order": 2}),
        ];
        let report = repair(raw, 10);
        assert_eq!(orders(&report), vec![0, 1, 2]);
        assert_eq!(report.dropped.len(), 2);
        assert_eq!(report.blocks[1].block_type, BlockType::Text);
        assert_eq!(report.blocks[2].id, "block_2");
    }

    #[test]
    fn out_of_bounds_quiz_is_demoted_not_dropped() {
        let raw = vec![json!({
            "type": "quiz",
            "question": "What do plants need?",
            "options": ["Light", "Noise"],
            "correct_index": 5
        })];
        let report = repair(raw, 10);
        assert_eq!(report.blocks.len(), 1);
        let block = &report.blocks[0];
        assert_eq!(block.block_type, BlockType::Text);
        assert!(block.content.contains("What do plants need?"));
        assert!(block.correct_index.is_none());
        assert_eq!(report.demoted.len(), 1);
    }

    #[test]
    fn single_option_quiz_is_demoted() {
        let raw = vec![json!({
            "type": "quiz",
            "question": "Pick one",
            "options": ["Only"],
            "correct_index": 0
        })];
        let report = repair(raw, 10);
        assert_eq!(report.blocks[0].block_type, BlockType::Text);
    }

    #[test]
    fn valid_quiz_survives() {
        let raw = vec![json!({
            "type": "quiz",
            "content": "Check your understanding",
            "question": "What do plants need?",
            "options": ["Light", "Noise", "Plastic"],
            "correct_index": 0
        })];
        let report = repair(raw, 10);
        let block = &report.blocks[0];
        assert_eq!(block.block_type, BlockType::Quiz);
        assert_eq!(block.correct_index, Some(0));
        assert_eq!(block.options.len(), 3);
        assert!(report.demoted.is_empty());
    }

    #[test]
    fn truncation_keeps_summary() {
        let mut raw: Vec<Value> = (0..8)
            .map(|i| json!({"type": "text", "content": format!("part {}", i)}))
            .collect();
        raw.push(json!({"type": "summary", "content": "recap"}));
        let report = repair(raw, 5);
        assert_eq!(report.blocks.len(), 5);
        assert_eq!(report.truncated, 4);
        assert_eq!(report.blocks[4].block_type, BlockType::Summary);
        assert_eq!(report.blocks[3].content, "part 3");
        assert_eq!(orders(&report), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn emphasis_must_occur_in_content() {
        let raw = vec![json!({
            "type": "text",
            "content": "Photosynthesis turns light into sugar.",
            "emphasis": ["Photosynthesis", "chlorophyll", 3, "Photosynthesis"]
        })];
        let report = repair(raw, 10);
        assert_eq!(report.blocks[0].emphasis, vec!["Photosynthesis"]);
    }

    #[test]
    fn parses_fenced_and_wrapped_output() {
        let fenced = "```json\n{\"adaptation_style\": \"Visual\", \"blocks\": [{\"type\": \"text\", \"content\": \"hi\"}]}\n```";
        let (style, blocks) = parse_output(fenced).unwrap();
        assert_eq!(style.as_deref(), Some("Visual"));
        assert_eq!(blocks.len(), 1);

        let prose = "Here you go: [{\"type\": \"heading\", \"content\": \"A\"}] enjoy";
        let (style, blocks) = parse_output(prose).unwrap();
        assert!(style.is_none());
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn unparsable_output_fails() {
        assert!(parse_output("I cannot help with that").is_err());
        assert!(parse_output("{\"title\": \"no blocks\"}").is_err());
    }
}
