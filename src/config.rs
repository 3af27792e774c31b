// src/config.rs

//! Engine tunables.
//!
//! Every threshold the engine uses is carried here with a default taken from
//! `constants.rs`. A JSON file may override any subset of fields.

use crate::constants::*;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Normalized scale score at or below which complexity is LOW
    pub complexity_low_threshold: f64,
    /// Normalized scale score above which complexity is HIGH
    pub complexity_high_threshold: f64,
    pub default_attention_span_minutes: u32,
    pub max_interests: usize,

    pub block_ceiling_base: u32,
    pub block_ceiling_minutes_per_block: u32,
    pub block_ceiling_min: u32,
    pub block_ceiling_max: u32,
    pub max_lesson_content_chars: usize,

    pub generation_timeout_ms: u64,
    pub enrichment_timeout_ms: u64,
    pub claim_wait_timeout_ms: u64,
    pub claim_poll_interval_ms: u64,
    pub stale_generation_ms: u64,
    pub retry_hint_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            complexity_low_threshold: COMPLEXITY_LOW_THRESHOLD,
            complexity_high_threshold: COMPLEXITY_HIGH_THRESHOLD,
            default_attention_span_minutes: DEFAULT_ATTENTION_SPAN_MINUTES,
            max_interests: MAX_PROFILE_INTERESTS,
            block_ceiling_base: BLOCK_CEILING_BASE,
            block_ceiling_minutes_per_block: BLOCK_CEILING_MINUTES_PER_BLOCK,
            block_ceiling_min: BLOCK_CEILING_MIN,
            block_ceiling_max: BLOCK_CEILING_MAX,
            max_lesson_content_chars: MAX_LESSON_CONTENT_CHARS,
            generation_timeout_ms: GENERATION_TIMEOUT_MS,
            enrichment_timeout_ms: ENRICHMENT_TIMEOUT_MS,
            claim_wait_timeout_ms: CLAIM_WAIT_TIMEOUT_MS,
            claim_poll_interval_ms: CLAIM_POLL_INTERVAL_MS,
            stale_generation_ms: STALE_GENERATION_MS,
            retry_hint_ms: RETRY_HINT_MS,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::validation(
                "config",
                format!("cannot read {}: {}", path.as_ref().display(), e),
            )
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.complexity_low_threshold)
            || !unit.contains(&self.complexity_high_threshold)
            || self.complexity_low_threshold >= self.complexity_high_threshold
        {
            return Err(EngineError::validation(
                "complexity_thresholds",
                "thresholds must satisfy 0 <= low < high <= 1",
            ));
        }
        if self.block_ceiling_min == 0 || self.block_ceiling_min > self.block_ceiling_max {
            return Err(EngineError::validation(
                "block_ceiling",
                "ceiling bounds must satisfy 0 < min <= max",
            ));
        }
        if self.block_ceiling_minutes_per_block == 0 {
            return Err(EngineError::validation(
                "block_ceiling_minutes_per_block",
                "must be positive",
            ));
        }
        if self.default_attention_span_minutes == 0 {
            return Err(EngineError::validation(
                "default_attention_span_minutes",
                "must be positive",
            ));
        }
        if self.claim_poll_interval_ms == 0 || self.generation_timeout_ms == 0 {
            return Err(EngineError::validation(
                "timeouts",
                "poll interval and generation timeout must be positive",
            ));
        }
        Ok(())
    }

    /// Maximum number of blocks an adaptation may carry for a given span.
    pub fn block_ceiling(&self, attention_span_minutes: u32) -> usize {
        let raw = self.block_ceiling_base
            + attention_span_minutes / self.block_ceiling_minutes_per_block;
        raw.clamp(self.block_ceiling_min, self.block_ceiling_max) as usize
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn claim_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_wait_timeout_ms)
    }

    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_millis(self.claim_poll_interval_ms)
    }

    pub fn stale_generation(&self) -> Duration {
        Duration::from_millis(self.stale_generation_ms)
    }

    pub fn retry_hint(&self) -> Duration {
        Duration::from_millis(self.retry_hint_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"block_ceiling_max": 12}"#).unwrap();
        assert_eq!(config.block_ceiling_max, 12);
        assert_eq!(config.block_ceiling_min, BLOCK_CEILING_MIN);
        assert_eq!(config.complexity_low_threshold, COMPLEXITY_LOW_THRESHOLD);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = EngineConfig::from_json(
            r#"{"complexity_low_threshold": 0.8, "complexity_high_threshold": 0.2}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn longer_spans_allow_more_blocks() {
        let config = EngineConfig::default();
        assert_eq!(config.block_ceiling(1), 5);
        assert_eq!(config.block_ceiling(15), 10);
        assert_eq!(config.block_ceiling(30), 18);
        assert_eq!(config.block_ceiling(240), 25);
        assert!(config.block_ceiling(45) > config.block_ceiling(15));
    }
}
