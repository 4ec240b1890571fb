use thiserror::Error;

/// Errors raised by column storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnarError {
    #[error("key {key} already holds a value")]
    AlreadyPresent { key: u32 },
    /// Storage invariant violation: a key must be live in at most one arena.
    #[error("key {key} is live in several arenas ({arenas})")]
    KeyInSeveralArenas { key: u32, arenas: String },
    #[error("slice dictionary is full")]
    KeySpaceExhausted,
    #[error("cannot merge values: {0}")]
    Merge(String),
}
