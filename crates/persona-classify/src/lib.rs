//! # persona-classify
//!
//! The classification engine: a process-local, generation-stamped cache
//! of the persona/keyword catalog, and the deterministic exact-match
//! classifier built on top of it.
//!
//! The cache is injected with a [`persona_core::CatalogRepository`] and
//! refreshed by wholesale snapshot replacement — it is never mutated
//! field-by-field, so concurrent readers either see the old snapshot or
//! the new one, never a torn state.

pub mod cache;
pub mod classifier;

pub use cache::{CatalogSnapshot, ClassifierCache};
pub use classifier::Classifier;
