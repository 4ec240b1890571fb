use crate::error::{EngineError, EngineResult};
use crate::measure::Measure;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Resolves measure names while the query DAG is built.
pub trait MeasureResolver: fmt::Debug + Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<Measure>>;
}

/// In-memory measure registry.
#[derive(Clone, Debug, Default)]
pub struct MeasureForest {
    measures: BTreeMap<Arc<str>, Arc<Measure>>,
}

impl MeasureForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest, failing on the first duplicated name.
    pub fn with_measures(measures: impl IntoIterator<Item = Measure>) -> EngineResult<Self> {
        let mut forest = Self::new();
        for measure in measures {
            forest.add_measure(measure)?;
        }
        Ok(forest)
    }

    pub fn add_measure(&mut self, measure: Measure) -> EngineResult<()> {
        let name = measure.name().clone();
        if self.measures.contains_key(&name) {
            return Err(EngineError::DuplicateMeasure {
                measure: name.to_string(),
            });
        }
        self.measures.insert(name, Arc::new(measure));
        Ok(())
    }

    pub fn measure(&self, name: &str) -> Option<&Arc<Measure>> {
        self.measures.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.measures.keys()
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

impl MeasureResolver for MeasureForest {
    fn resolve(&self, name: &str) -> Option<Arc<Measure>> {
        self.measures.get(name).cloned()
    }
}
