//! # persona-core
//!
//! Core types, traits, and abstractions for persona-engine.
//!
//! This crate provides the job-title normalizer, the shared data model
//! (personas, keywords, contacts, reclassification jobs, metrics
//! snapshots), the error type, and the repository trait definitions that
//! other persona-engine crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use normalize::normalize;
pub use traits::*;
pub use uuid_utils::new_v7;
