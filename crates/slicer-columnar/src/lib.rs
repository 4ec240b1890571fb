//! Per-slice columnar storage for the slicer query engine.
//!
//! This crate focuses on:
//! - The slice model: immutable multi-column coordinates interned to dense `u32` keys.
//! - Nullable multitype columns: typed `i64` / `f64` arenas plus a generic arena, each with a
//!   run-optimizable hole bitmap.
//! - Push-style typed access through [`ValueReceiver`] / [`ValueProvider`].

#![forbid(unsafe_code)]

mod bitmap;
mod column;
mod dictionary;
mod error;
mod multitype;
mod slice;
mod value;

pub use crate::bitmap::BitVec;
pub use crate::column::{Cell, SliceColumn};
pub use crate::dictionary::SliceDictionary;
pub use crate::error::ColumnarError;
pub use crate::multitype::{ConflictPolicy, MultitypeColumn};
pub use crate::slice::{Coordinate, Slice};
pub use crate::value::{
    Value, ValueCapture, ValueMerger, ValueProvider, ValueReceiver, NULL_FLOAT, NULL_INT,
};
