//! Deterministic exact-match classification.

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use persona_core::{normalize, Classification, Result};

use crate::cache::{CachedPersona, ClassifierCache};

/// Classifies job titles into buyer personas.
///
/// Matching is intentionally conservative: the normalized title must
/// equal a registered keyword as a whole string. "Director" does not
/// match a keyword "director de marketing" — substring containment would
/// produce false positives across unrelated titles.
pub struct Classifier {
    cache: Arc<ClassifierCache>,
}

impl Classifier {
    pub fn new(cache: Arc<ClassifierCache>) -> Self {
        Self { cache }
    }

    /// Classify a job title, returning the full explanation.
    ///
    /// Blank titles and unmatched titles resolve to the default persona;
    /// this is never surfaced as an error.
    pub async fn classify(&self, job_title: &str) -> Result<Classification> {
        let normalized = normalize(job_title);
        let snapshot = self.cache.ensure_loaded().await?;

        if normalized.is_empty() {
            return Ok(fallback(snapshot.default_persona(), normalized));
        }

        match snapshot.lookup(&normalized) {
            Some(persona) => {
                trace!(
                    subsystem = "classify",
                    op = "classify",
                    persona_id = %persona.id,
                    cache_generation = snapshot.generation,
                    "Keyword match"
                );
                Ok(Classification {
                    persona_id: persona.id,
                    persona_name: persona.name.clone(),
                    matched_keywords: vec![normalized.clone()],
                    priority_used: persona.priority,
                    normalized_title: normalized,
                    is_default: false,
                })
            }
            None => Ok(fallback(snapshot.default_persona(), normalized)),
        }
    }

    /// Hot-path variant: only the persona id, no explanation.
    pub async fn classify_persona_id(&self, job_title: &str) -> Result<Uuid> {
        let normalized = normalize(job_title);
        let snapshot = self.cache.ensure_loaded().await?;
        Ok(match snapshot.lookup(&normalized) {
            Some(persona) if !normalized.is_empty() => persona.id,
            _ => snapshot.default_persona().id,
        })
    }

    /// Mark the underlying cache stale.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    /// Access the underlying cache (shared with other consumers).
    pub fn cache(&self) -> &Arc<ClassifierCache> {
        &self.cache
    }
}

fn fallback(default: &CachedPersona, normalized_title: String) -> Classification {
    Classification {
        persona_id: default.id,
        persona_name: default.name.clone(),
        matched_keywords: Vec::new(),
        priority_used: default.priority,
        normalized_title,
        is_default: true,
    }
}
