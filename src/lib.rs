// src/lib.rs

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod model;
pub mod models;
pub mod profile;
pub mod progress;
pub mod repository;
pub mod store;

pub use cache::PlayOutcome;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ModelError, Result};
pub use model::GenerativeModel;
pub use store::Store;
