use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

type Listener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    cancelled_at: Mutex<Option<SystemTime>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Cooperative cancellation shared between a caller and a running query.
///
/// The query checks the token between steps; a scan already streaming runs to completion.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("cancelled_at", &self.cancelled_at())
            .finish()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Listeners run once, on the first call.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self
            .state
            .cancelled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());
        let listeners = std::mem::take(
            &mut *self
                .state
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        log::debug!("query cancelled, notifying {} listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancelled_at(&self) -> Option<SystemTime> {
        *self
            .state
            .cancelled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `listener` on cancellation, immediately if already cancelled.
    pub fn on_cancel(&self, listener: impl FnOnce() + Send + 'static) {
        let mut listeners = self
            .state
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            drop(listeners);
            listener();
        } else {
            listeners.push(Box::new(listener));
        }
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Where the steps of one DAG level run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Executor {
    /// On the calling thread, one step after the other.
    Direct,
    /// On the crate-local worker pool.
    Pool,
}

/// Per-query evaluation context: executor, cancellation and counters.
///
/// Counters live here, not in globals, so concurrent queries never observe each other.
#[derive(Debug)]
pub struct QueryPod {
    token: CancellationToken,
    executor: Executor,
    debug: bool,
    steps_evaluated: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl QueryPod {
    pub fn new(token: CancellationToken, executor: Executor, debug: bool) -> Self {
        let executor = match executor {
            Executor::Pool if crate::parallel::worker_count() > 1 => Executor::Pool,
            _ => Executor::Direct,
        };
        Self {
            token,
            executor,
            debug,
            steps_evaluated: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn executor(&self) -> Executor {
        self.executor
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn check_cancelled(&self) -> EngineResult<()> {
        self.token.check()
    }

    pub(crate) fn record_step(&self) {
        self.steps_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn steps_evaluated(&self) -> usize {
        self.steps_evaluated.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Apply `f` to every item with the pod's executor, preserving item order in the output.
    pub(crate) fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        if self.executor == Executor::Pool && items.len() > 1 {
            if let Some(pool) = crate::parallel::step_pool() {
                use rayon::prelude::*;
                return pool.install(|| items.par_iter().map(&f).collect());
            }
        }
        items.iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_once() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        token.on_cancel(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert!(token.check().is_ok());
        assert!(token.cancelled_at().is_none());

        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(token.cancelled_at().is_some());
        assert!(matches!(token.check(), Err(EngineError::Cancelled)));

        let late = calls.clone();
        token.on_cancel(move || {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_preserves_order() {
        let pod = QueryPod::new(CancellationToken::new(), Executor::Pool, false);
        let out = pod.map(&[1, 2, 3, 4], |x| x * 10);
        assert_eq!(out, vec![10, 20, 30, 40]);
        assert_eq!(pod.steps_evaluated(), 0);
    }
}
