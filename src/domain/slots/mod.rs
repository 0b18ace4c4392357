//! Slot domain - models and queries for scheduled page posts

pub mod models;
pub mod queries;

pub use models::{Comment, Slot, normalize_instant};
