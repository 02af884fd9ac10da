//! Process-wide stage cache
//!
//! Stage construction is expensive (model loading), so constructed stages are
//! shared by every pipeline whose configuration yields the same
//! [`StageSignature`]. Lifecycle: create one cache at process start, hand an
//! `Arc` to every pipeline, call [`StageCache::clear`] to force
//! reconstruction (tests, reloads).
//!
//! Concurrency: the DashMap shard lock is only held while fetching the
//! per-signature cell, construction runs inside that cell's `OnceCell`, so
//! concurrent first requests for one signature construct exactly once while
//! other signatures proceed in parallel.
use crate::error::Result;
use crate::signature::StageSignature;
use crate::stage::Stage;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub type SharedStage = Arc<dyn Stage>;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub constructions: usize,
    pub hits: usize,
}

pub struct StageCache {
    entries: DashMap<StageSignature, Arc<OnceCell<SharedStage>>>,
    constructions: AtomicUsize,
    hits: AtomicUsize,
}

impl StageCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            constructions: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    /// Return the cached stage for `signature`, constructing it with
    /// `factory` on first use. A failed construction leaves no entry behind,
    /// the next request retries.
    pub fn get<F>(&self, signature: &StageSignature, factory: F) -> Result<SharedStage>
    where
        F: FnOnce() -> Result<SharedStage>,
    {
        let cell = self
            .entries
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(stage) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Stage cache hit: {}", signature);
            return Ok(stage.clone());
        }

        let built = cell.get_or_try_init(|| {
            info!("Constructing stage {}", signature);
            let stage = factory()?;
            self.constructions.fetch_add(1, Ordering::Relaxed);
            Ok::<_, crate::error::PipelineError>(stage)
        });

        match built {
            Ok(stage) => Ok(stage.clone()),
            Err(e) => {
                // Drop the empty cell so failing signatures do not accumulate
                self.entries
                    .remove_if(signature, |_, c| Arc::ptr_eq(c, &cell) && c.get().is_none());
                Err(e)
            }
        }
    }

    /// Cached stage, without constructing
    pub fn peek(&self, signature: &StageSignature) -> Option<SharedStage> {
        self.entries
            .get(signature)
            .and_then(|cell| cell.get().cloned())
    }

    /// Evict every entry. Pipelines already built keep their stages; later
    /// `get` calls construct fresh instances.
    ///
    /// A `get` that fetched its cell before the eviction still constructs
    /// into that evicted cell and returns the result, but the instance is not
    /// cached, so the next `get` for the same signature constructs again.
    /// Clearing is meant for reloads and tests, and this duplicate
    /// construction is accepted.
    pub fn clear(&self) {
        let evicted = self.entries.len();
        self.entries.clear();
        info!("Stage cache cleared ({} entries evicted)", evicted);
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            constructions: self.constructions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

impl Default for StageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::context::DocumentContext;
    use crate::error::PipelineError;
    use std::sync::Barrier;
    use std::time::Duration;

    struct NoopStage;

    impl Stage for NoopStage {
        fn name(&self) -> &str {
            "noop"
        }

        fn requires(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn satisfies(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn run(&self, _ctx: &mut DocumentContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop() -> Result<SharedStage> {
        Ok(Arc::new(NoopStage))
    }

    #[test]
    fn test_get_constructs_once() {
        let cache = StageCache::new();
        let sig = StageSignature::new("noop", "h1");

        let a = cache.get(&sig, noop).unwrap();
        let b = cache.get(&sig, || panic!("factory must not run twice")).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                constructions: 1,
                hits: 1
            }
        );
    }

    #[test]
    fn test_distinct_signatures_distinct_instances() {
        let cache = StageCache::new();
        let a = cache.get(&StageSignature::new("noop", "h1"), noop).unwrap();
        let b = cache.get(&StageSignature::new("noop", "h2"), noop).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_forces_reconstruction() {
        let cache = StageCache::new();
        let sig = StageSignature::new("noop", "h1");

        let before = cache.get(&sig, noop).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.peek(&sig).is_none());

        let after = cache.get(&sig, noop).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(cache.stats().constructions, 2);
    }

    #[test]
    fn test_failed_construction_is_retried() {
        let cache = StageCache::new();
        let sig = StageSignature::new("noop", "h1");

        let err = cache
            .get(&sig, || Err(PipelineError::construction("noop", "model not found")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageConstruction { .. }));
        assert!(cache.is_empty());

        assert!(cache.get(&sig, noop).is_ok());
        assert_eq!(cache.stats().constructions, 1);
    }

    #[test]
    fn test_failed_constructions_leave_no_cells() {
        let cache = StageCache::new();
        for i in 0..16 {
            let sig = StageSignature::new("noop", &format!("bad{}", i));
            assert!(cache
                .get(&sig, || Err(PipelineError::construction("noop", "model not found")))
                .is_err());
        }
        assert_eq!(cache.entries.len(), 0);

        cache.get(&StageSignature::new("noop", "good"), noop).unwrap();
        assert_eq!(cache.entries.len(), 1);
    }

    #[test]
    fn test_get_in_flight_during_clear_is_not_cached() {
        let cache = Arc::new(StageCache::new());
        let sig = StageSignature::new("noop", "h1");
        let entered = Arc::new(Barrier::new(2));
        let cleared = Arc::new(Barrier::new(2));

        let in_flight = {
            let cache = cache.clone();
            let sig = sig.clone();
            let entered = entered.clone();
            let cleared = cleared.clone();
            std::thread::spawn(move || {
                cache
                    .get(&sig, || {
                        entered.wait();
                        cleared.wait();
                        noop()
                    })
                    .unwrap()
            })
        };

        entered.wait();
        cache.clear();
        cleared.wait();
        let first = in_flight.join().unwrap();

        assert!(cache.peek(&sig).is_none());
        let second = cache.get(&sig, noop).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().constructions, 2);
    }

    #[test]
    fn test_concurrent_first_access_constructs_once() {
        let cache = Arc::new(StageCache::new());
        let built = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let sig = StageSignature::new("noop", "slow");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let built = built.clone();
                let barrier = barrier.clone();
                let sig = sig.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get(&sig, || {
                            built.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            noop()
                        })
                        .unwrap()
                })
            })
            .collect();

        let stages: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(stages.iter().all(|s| Arc::ptr_eq(s, &stages[0])));
    }
}
