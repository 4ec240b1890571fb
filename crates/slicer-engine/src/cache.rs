use crate::error::EngineResult;
use crate::query::QueryStep;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use slicer_columnar::SliceColumn;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Evaluated step columns shared across queries, keyed by structural step identity.
pub trait QueryStepCache: fmt::Debug + Send + Sync {
    fn get(&self, step: &QueryStep) -> Option<Arc<SliceColumn>>;

    fn insert(&self, step: &QueryStep, column: Arc<SliceColumn>);

    /// Return the cached column of `step`, computing and storing it on a miss.
    fn get_or_compute(
        &self,
        step: &QueryStep,
        compute: &mut dyn FnMut() -> EngineResult<Arc<SliceColumn>>,
    ) -> EngineResult<Arc<SliceColumn>> {
        if let Some(column) = self.get(step) {
            return Ok(column);
        }
        let column = compute()?;
        self.insert(step, column.clone());
        Ok(column)
    }

    fn contains(&self, step: &QueryStep) -> bool {
        self.get(step).is_some()
    }

    fn invalidate_all(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CachePolicy {
    None,
    /// Least-recently-used eviction beyond `max_entries`.
    Bounded { max_entries: usize },
    #[default]
    Unbounded,
}

impl CachePolicy {
    pub fn build(self) -> Arc<dyn QueryStepCache> {
        match self {
            CachePolicy::None => Arc::new(NoCache),
            CachePolicy::Bounded { max_entries } => Arc::new(BoundedCache::new(max_entries)),
            CachePolicy::Unbounded => Arc::new(UnboundedCache::new()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl QueryStepCache for NoCache {
    fn get(&self, _step: &QueryStep) -> Option<Arc<SliceColumn>> {
        None
    }

    fn insert(&self, _step: &QueryStep, _column: Arc<SliceColumn>) {}

    fn invalidate_all(&self) {}

    fn len(&self) -> usize {
        0
    }
}

type Slot = Arc<Mutex<Option<Arc<SliceColumn>>>>;

/// Never evicts. Every step owns a slot whose lock is held while it is computed, so concurrent
/// queries needing the same step wait for one evaluation instead of racing.
#[derive(Debug, Default)]
pub struct UnboundedCache {
    slots: DashMap<QueryStep, Slot>,
}

impl UnboundedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, step: &QueryStep) -> Slot {
        if let Some(slot) = self.slots.get(step) {
            return slot.clone();
        }
        // Cloned out so no shard lock is held while computing.
        self.slots.entry(step.clone()).or_default().clone()
    }
}

impl QueryStepCache for UnboundedCache {
    fn get(&self, step: &QueryStep) -> Option<Arc<SliceColumn>> {
        let slot = self.slots.get(step)?.clone();
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    fn insert(&self, step: &QueryStep, column: Arc<SliceColumn>) {
        let slot = self.slot(step);
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(column);
    }

    fn get_or_compute(
        &self,
        step: &QueryStep,
        compute: &mut dyn FnMut() -> EngineResult<Arc<SliceColumn>>,
    ) -> EngineResult<Arc<SliceColumn>> {
        let slot = self.slot(step);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(column) = guard.as_ref() {
            return Ok(column.clone());
        }
        let column = compute()?;
        *guard = Some(column.clone());
        Ok(column)
    }

    fn contains(&self, step: &QueryStep) -> bool {
        self.slots.get(step).map_or(false, |slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    fn invalidate_all(&self) {
        self.slots.clear();
    }

    fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.value()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }
}

/// Keeps at most `max_entries` columns, evicting the least recently used. Computation happens
/// outside the lock, so racing queries may evaluate the same step twice.
#[derive(Debug)]
pub struct BoundedCache {
    max_entries: usize,
    /// `None` when `max_entries` is zero: nothing is ever retained.
    entries: Option<Mutex<LruCache<QueryStep, Arc<SliceColumn>>>>,
}

impl BoundedCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: NonZeroUsize::new(max_entries).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<QueryStep, Arc<SliceColumn>>>> {
        self.entries
            .as_ref()
            .map(|entries| entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl QueryStepCache for BoundedCache {
    fn get(&self, step: &QueryStep) -> Option<Arc<SliceColumn>> {
        self.lock()?.get(step).cloned()
    }

    fn insert(&self, step: &QueryStep, column: Arc<SliceColumn>) {
        let Some(mut entries) = self.lock() else {
            return;
        };
        if let Some((evicted, _)) = entries.push(step.clone(), column) {
            if evicted != *step {
                log::trace!("evicting cached step {evicted}");
            }
        }
    }

    fn invalidate_all(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }

    fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }
}
