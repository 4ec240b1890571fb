//! Worker pool for the independent steps of one DAG level.
//!
//! The pool is crate-local and built lazily on the first concurrent query. Its size comes from
//! `SLICER_STEP_THREADS`, then `RAYON_NUM_THREADS`, then the available parallelism. When the
//! requested size cannot be spawned the size is halved until a pool starts; if not even one
//! worker starts, concurrent queries run on the calling thread.

#[cfg(feature = "parallel")]
use rayon::ThreadPool;
#[cfg(feature = "parallel")]
use std::sync::OnceLock;

pub(crate) const STEP_THREADS_ENV: &str = "SLICER_STEP_THREADS";

/// A positive thread count, or nothing.
fn parse_threads(raw: Option<String>) -> Option<usize> {
    raw?.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

fn requested_workers() -> usize {
    parse_threads(std::env::var(STEP_THREADS_ENV).ok())
        .or_else(|| parse_threads(std::env::var("RAYON_NUM_THREADS").ok()))
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}

#[cfg(feature = "parallel")]
static STEP_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(feature = "parallel")]
fn spawn_step_pool(requested: usize) -> Option<ThreadPool> {
    let mut threads = requested.max(1);
    loop {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("slicer-step-{idx}"))
            .build();
        match built {
            Ok(pool) => {
                log::debug!("step pool started with {threads} of {requested} requested workers");
                return Some(pool);
            }
            Err(err) if threads > 1 => {
                log::warn!("cannot start {threads} step workers ({err})");
                threads /= 2;
            }
            Err(err) => {
                log::warn!("no step pool ({err}); concurrent queries run on the calling thread");
                return None;
            }
        }
    }
}

#[cfg(feature = "parallel")]
pub(crate) fn step_pool() -> Option<&'static ThreadPool> {
    STEP_POOL
        .get_or_init(|| spawn_step_pool(requested_workers()))
        .as_ref()
}

/// Number of workers a concurrent pod evaluates with; one means evaluating in place.
pub(crate) fn worker_count() -> usize {
    #[cfg(feature = "parallel")]
    {
        step_pool().map_or(1, ThreadPool::current_num_threads)
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_counts_must_be_positive_integers() {
        assert_eq!(parse_threads(Some(" 4 ".into())), Some(4));
        assert_eq!(parse_threads(Some("0".into())), None);
        assert_eq!(parse_threads(Some("many".into())), None);
        assert_eq!(parse_threads(None), None);
        assert!(requested_workers() >= 1);
        assert!(worker_count() >= 1);
    }
}
