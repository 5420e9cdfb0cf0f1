//! Catalog cache: keyword→persona lookups without a storage round-trip
//! per contact.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use persona_core::{normalize, BuyerPersona, Catalog, CatalogRepository, Error, Result};

/// One persona as held in a snapshot.
#[derive(Debug, Clone)]
pub struct CachedPersona {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub is_default: bool,
    /// Normalized keyword strings owned by this persona.
    pub keywords: HashSet<String>,
}

/// An immutable view of the catalog built from a single consistent read.
///
/// `index` maps each normalized keyword to the position of its winning
/// persona in `personas`. It is built first-insert-wins while walking
/// personas in ascending priority order, so a keyword registered under
/// two personas resolves to the lower priority number — the same result
/// an ordered walk would produce, at O(1) per lookup.
#[derive(Debug)]
pub struct CatalogSnapshot {
    pub generation: u64,
    /// Ascending priority order, the designated default last.
    pub personas: Vec<CachedPersona>,
    index: HashMap<String, usize>,
    default_idx: usize,
}

impl CatalogSnapshot {
    /// Build a snapshot from a loaded catalog.
    ///
    /// Fails with `Error::Config` when no persona is flagged as the
    /// default — classification has nowhere to fall back to.
    pub fn build(catalog: Catalog, generation: u64) -> Result<Self> {
        let Catalog { personas, keywords } = catalog;

        let mut cached: Vec<CachedPersona> = personas
            .iter()
            .map(|p: &BuyerPersona| CachedPersona {
                id: p.id,
                name: p.name.clone(),
                priority: p.priority,
                is_default: p.is_default,
                keywords: HashSet::new(),
            })
            .collect();

        // The default evaluates last regardless of its priority number.
        cached.sort_by_key(|p| (p.is_default, p.priority));

        let default_idx = cached
            .iter()
            .position(|p| p.is_default)
            .ok_or_else(|| Error::Config("no default buyer persona configured".into()))?;

        let by_id: HashMap<Uuid, usize> = cached.iter().enumerate().map(|(i, p)| (p.id, i)).collect();

        for kw in keywords {
            let Some(&idx) = by_id.get(&kw.buyer_persona_id) else {
                // Keyword pointing at a deleted persona; skip it.
                continue;
            };
            let normalized = if kw.keyword_normalized.is_empty() {
                normalize(&kw.keyword)
            } else {
                kw.keyword_normalized
            };
            if normalized.is_empty() {
                continue;
            }
            cached[idx].keywords.insert(normalized);
        }

        let mut index = HashMap::new();
        for (i, persona) in cached.iter().enumerate() {
            for kw in &persona.keywords {
                // First insert wins: lower priority already claimed it.
                index.entry(kw.clone()).or_insert(i);
            }
        }

        Ok(Self {
            generation,
            personas: cached,
            index,
            default_idx,
        })
    }

    /// Resolve a normalized title to its winning persona, if any keyword
    /// matches it exactly.
    pub fn lookup(&self, normalized_title: &str) -> Option<&CachedPersona> {
        self.index.get(normalized_title).map(|&i| &self.personas[i])
    }

    /// The fallback persona.
    pub fn default_persona(&self) -> &CachedPersona {
        &self.personas[self.default_idx]
    }

    /// Total number of distinct normalized keywords indexed.
    pub fn keyword_count(&self) -> usize {
        self.index.len()
    }
}

#[derive(Default)]
struct CacheState {
    valid: bool,
    generation: u64,
    snapshot: Option<Arc<CatalogSnapshot>>,
}

/// Process-local catalog cache with explicit invalidation.
///
/// The cache is either fully valid (one loaded snapshot) or invalid;
/// refresh replaces the snapshot atomically under the write lock. A
/// reader that arrives during a load waits on the lock rather than
/// triggering a duplicate load, and readers holding an `Arc` to the old
/// snapshot are unaffected by the swap.
pub struct ClassifierCache {
    catalog: Arc<dyn CatalogRepository>,
    state: RwLock<CacheState>,
}

impl ClassifierCache {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self {
            catalog,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Return the current snapshot, loading it first if the cache is
    /// invalid. Concurrent callers during a load never observe a
    /// half-built snapshot and never trigger duplicate loads.
    pub async fn ensure_loaded(&self) -> Result<Arc<CatalogSnapshot>> {
        {
            let state = self.state.read().await;
            if state.valid {
                if let Some(snapshot) = &state.snapshot {
                    return Ok(snapshot.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Double-check: another caller may have finished the load while
        // we waited for the write lock.
        if state.valid {
            if let Some(snapshot) = &state.snapshot {
                return Ok(snapshot.clone());
            }
        }

        let catalog = self.catalog.load_catalog().await?;
        let generation = state.generation + 1;
        let snapshot = Arc::new(CatalogSnapshot::build(catalog, generation)?);

        info!(
            subsystem = "classify",
            component = "cache",
            op = "load",
            cache_generation = generation,
            personas = snapshot.personas.len(),
            keywords = snapshot.keyword_count(),
            "Catalog cache loaded"
        );

        state.generation = generation;
        state.snapshot = Some(snapshot.clone());
        state.valid = true;
        Ok(snapshot)
    }

    /// Mark the cache stale. The next `ensure_loaded` call, from any
    /// caller, triggers a fresh read. Must be invoked whenever a keyword
    /// or persona-priority record is mutated.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.valid = false;
        debug!(
            subsystem = "classify",
            component = "cache",
            op = "invalidate",
            cache_generation = state.generation,
            "Catalog cache invalidated"
        );
    }

    /// Generation of the last completed load.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use persona_core::JobKeyword;

    fn persona(name: &str, priority: i32, is_default: bool) -> BuyerPersona {
        BuyerPersona {
            id: Uuid::new_v4(),
            name: name.to_string(),
            priority,
            is_default,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn keyword(text: &str, persona_id: Uuid) -> JobKeyword {
        JobKeyword {
            id: Uuid::new_v4(),
            keyword: text.to_string(),
            keyword_normalized: normalize(text),
            buyer_persona_id: persona_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_requires_default_persona() {
        let catalog = Catalog {
            personas: vec![persona("Sales", 1, false)],
            keywords: vec![],
        };
        let err = CatalogSnapshot::build(catalog, 1).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_index_first_insert_wins_on_duplicate_keyword() {
        let high = persona("Executive", 1, false);
        let low = persona("Operations", 5, false);
        let fallback = persona("Other", 99, true);
        let keywords = vec![keyword("ceo", low.id), keyword("ceo", high.id)];
        let snapshot = CatalogSnapshot::build(
            Catalog {
                personas: vec![high.clone(), low, fallback],
                keywords,
            },
            1,
        )
        .unwrap();

        let winner = snapshot.lookup("ceo").unwrap();
        assert_eq!(winner.id, high.id);
        assert_eq!(winner.priority, 1);
    }

    #[test]
    fn test_default_sorts_last_even_with_low_priority() {
        let fallback = persona("Other", 0, true);
        let sales = persona("Sales", 7, false);
        let snapshot = CatalogSnapshot::build(
            Catalog {
                personas: vec![fallback.clone(), sales.clone()],
                keywords: vec![],
            },
            1,
        )
        .unwrap();

        assert_eq!(snapshot.personas.last().unwrap().id, fallback.id);
        assert_eq!(snapshot.default_persona().id, fallback.id);
        assert_eq!(snapshot.personas[0].id, sales.id);
    }

    #[test]
    fn test_blank_keywords_are_not_indexed() {
        let p = persona("Sales", 1, false);
        let fallback = persona("Other", 99, true);
        let mut kw = keyword("  ", p.id);
        kw.keyword_normalized = String::new();
        let snapshot = CatalogSnapshot::build(
            Catalog {
                personas: vec![p, fallback],
                keywords: vec![kw],
            },
            1,
        )
        .unwrap();
        assert_eq!(snapshot.keyword_count(), 0);
    }

    #[test]
    fn test_keyword_for_missing_persona_is_skipped() {
        let p = persona("Sales", 1, false);
        let fallback = persona("Other", 99, true);
        let orphan = keyword("ghost", Uuid::new_v4());
        let snapshot = CatalogSnapshot::build(
            Catalog {
                personas: vec![p, fallback],
                keywords: vec![orphan],
            },
            1,
        )
        .unwrap();
        assert!(snapshot.lookup("ghost").is_none());
    }
}
