use slicer_columnar::ColumnarError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown measure: {0}")]
    UnknownMeasure(String),

    #[error("duplicate measure: {measure}")]
    DuplicateMeasure { measure: String },

    #[error("measure cycle: {}", path.join(" -> "))]
    MeasureCycle { path: Vec<String> },

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("unknown column: {column}")]
    UnknownColumn { column: String },

    #[error("schema mismatch for {table}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("storage error: {0}")]
    Storage(ColumnarError),

    #[error("table scan failed on {table}: {message}")]
    TableScan { table: String, message: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("evaluation of {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Whether this error is (or wraps) a cooperative cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::Step { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Attach the failing step. Cancellations and already-attributed errors pass through.
    pub(crate) fn in_step(self, step: &impl std::fmt::Display) -> Self {
        match self {
            EngineError::Cancelled | EngineError::Step { .. } | EngineError::TableScan { .. } => {
                self
            }
            other => EngineError::Step {
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl From<ColumnarError> for EngineError {
    fn from(err: ColumnarError) -> Self {
        match err {
            // Merges fail on value shapes, not on storage.
            ColumnarError::Merge(message) => EngineError::Type(message),
            other => EngineError::Storage(other),
        }
    }
}
