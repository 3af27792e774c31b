// src/constants.rs

// --- Time Constants ---
pub const GENERATION_TIMEOUT_MS: u64 = 60_000;
pub const ENRICHMENT_TIMEOUT_MS: u64 = 20_000;
pub const CLAIM_WAIT_TIMEOUT_MS: u64 = 30_000;
pub const CLAIM_POLL_INTERVAL_MS: u64 = 250;
pub const STALE_GENERATION_MS: u64 = 120_000; // GENERATING older than this is reclaimable
pub const RETRY_HINT_MS: u64 = 5_000;
pub const DB_BUSY_TIMEOUT_MS: u64 = 5_000;

// --- Profile Derivation ---
// Scale answers are normalized to 0..1 before bucketing.
pub const COMPLEXITY_LOW_THRESHOLD: f64 = 0.34;
pub const COMPLEXITY_HIGH_THRESHOLD: f64 = 0.66;

pub const DEFAULT_ATTENTION_SPAN_MINUTES: u32 = 15;
pub const ATTENTION_OPEN_BUCKET_EXTRA_MINUTES: u32 = 5; // "More than 30 minutes" -> 35
pub const MAX_PROFILE_INTERESTS: usize = 10;

// Confidence assigned to a derived attribute
pub const CONFIDENCE_MAPPED: f64 = 1.0;
pub const CONFIDENCE_FALLBACK: f64 = 0.5;

// --- Block Generation ---
// ceiling = clamp(BASE + span / MINUTES_PER_BLOCK, MIN, MAX)
pub const BLOCK_CEILING_BASE: u32 = 3;
pub const BLOCK_CEILING_MINUTES_PER_BLOCK: u32 = 2;
pub const BLOCK_CEILING_MIN: u32 = 5;
pub const BLOCK_CEILING_MAX: u32 = 25;

pub const MAX_LESSON_CONTENT_CHARS: usize = 5_000;
pub const MAX_PROMPT_INTERESTS: usize = 5;
pub const DEFAULT_ADAPTATION_STYLE: &str = "Personalized";

// --- Training Data ---
pub const SOURCE_TYPE_ADAPTED_LESSON: &str = "adapted_lesson";
pub const DEFAULT_TRAINING_BATCH_LIMIT: usize = 500;

// --- Adaptation Cache ---
// Upper bound on lookup/claim rounds for one play request
pub const MAX_PLAY_ROUNDS: u32 = 4;
