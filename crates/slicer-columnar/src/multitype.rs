use crate::value::{ValueCapture, ValueMerger, ValueReceiver, NULL_FLOAT, NULL_INT};
use crate::{ColumnarError, Value};
use croaring::Bitmap;

/// What [`MultitypeColumn::append`] does when the key already holds a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Reject the write with [`ColumnarError::AlreadyPresent`].
    #[default]
    Fail,
    /// Replace the existing value, like `set`.
    Overwrite,
}

/// A growable typed backing array plus the bitmap of its holes.
///
/// Position `i` is live iff `i < values.len()` and `i` is not a hole. The hole bitmap never
/// references positions past the end of `values`.
#[derive(Clone, Debug, Default)]
struct Arena<T> {
    values: Vec<T>,
    holes: Bitmap,
}

impl<T: Default> Arena<T> {
    fn is_live(&self, key: u32) -> bool {
        (key as usize) < self.values.len() && !self.holes.contains(key)
    }

    fn get(&self, key: u32) -> Option<&T> {
        if self.is_live(key) {
            self.values.get(key as usize)
        } else {
            None
        }
    }

    fn store(&mut self, key: u32, value: T) {
        let idx = key as usize;
        let len = self.values.len();
        if idx < len {
            self.values[idx] = value;
            self.holes.remove(key);
            return;
        }
        if idx > len {
            // Keys are assigned by the caller and may skip ahead: everything in between is a hole.
            self.holes.add_range(len as u32..key);
            self.values.resize_with(idx, T::default);
        }
        self.values.push(value);
    }

    fn clear(&mut self, key: u32) -> bool {
        if !self.is_live(key) {
            return false;
        }
        self.holes.add(key);
        // Release the payload (matters for text and error objects).
        self.values[key as usize] = T::default();
        true
    }

    fn live_count(&self) -> usize {
        self.values.len() - self.holes.cardinality() as usize
    }

    fn compact(&mut self) {
        while let Some(last) = self.values.len().checked_sub(1) {
            if !self.holes.contains(last as u32) {
                break;
            }
            self.holes.remove(last as u32);
            self.values.pop();
        }
        self.values.shrink_to_fit();
        self.holes.run_optimize();
        self.holes.shrink_to_fit();
    }
}

/// Nullable storage of heterogeneous scalars indexed by a dense `u32` key.
///
/// Three arenas share one key space: `i64`, `f64` and generic [`Value`] objects. A key is live in
/// at most one arena; every write goes through a single path that clears the other two arenas
/// first, so a value changing type never leaves a stale entry behind.
#[derive(Clone, Debug, Default)]
pub struct MultitypeColumn {
    ints: Arena<i64>,
    floats: Arena<f64>,
    objects: Arena<Value>,
    on_conflict: ConflictPolicy,
}

impl MultitypeColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conflict_policy(on_conflict: ConflictPolicy) -> Self {
        Self {
            on_conflict,
            ..Self::default()
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.on_conflict
    }

    /// Overwrite the value under `key`. Writing [`Value::Null`] removes it.
    pub fn set(&mut self, key: u32, value: Value) {
        self.write(key, value);
    }

    pub fn set_int(&mut self, key: u32, value: i64) {
        self.write(key, Value::Int(value));
    }

    pub fn set_float(&mut self, key: u32, value: f64) {
        self.write(key, Value::Float(value));
    }

    /// Like [`set`](Self::set), except that writing over a live key follows the column's
    /// [`ConflictPolicy`].
    pub fn append(&mut self, key: u32, value: Value) -> Result<(), ColumnarError> {
        if self.contains_index(key) && self.on_conflict == ConflictPolicy::Fail {
            return Err(ColumnarError::AlreadyPresent { key });
        }
        self.write(key, value);
        Ok(())
    }

    /// Accumulating append: a live key is combined with `value` through `merger`.
    pub fn append_merge(
        &mut self,
        key: u32,
        value: Value,
        merger: &dyn ValueMerger,
    ) -> Result<(), ColumnarError> {
        if !self.contains_index(key) {
            self.write(key, value);
            return Ok(());
        }
        let existing = self.read_value(key);
        let merged = merger.merge(existing, value)?;
        self.write(key, merged);
        Ok(())
    }

    /// Remove the value under `key`. Arenas never shrink here.
    ///
    /// Returns whether a value was present.
    pub fn remove(&mut self, key: u32) -> bool {
        let present = self.contains_index(key);
        self.write(key, Value::Null);
        present
    }

    fn write(&mut self, key: u32, value: Value) {
        match value {
            Value::Null => {
                self.ints.clear(key);
                self.floats.clear(key);
                self.objects.clear(key);
            }
            Value::Int(v) => {
                self.floats.clear(key);
                self.objects.clear(key);
                self.ints.store(key, v);
            }
            Value::Float(v) => {
                self.ints.clear(key);
                self.objects.clear(key);
                self.floats.store(key, v);
            }
            other => {
                self.ints.clear(key);
                self.floats.clear(key);
                self.objects.store(key, other);
            }
        }
        debug_assert!(self.check_key(key).is_ok(), "safe write left key {key} in several arenas");
    }

    /// Push the value under `key` to `receiver`, through the channel matching its type.
    pub fn get<R: ValueReceiver + ?Sized>(&self, key: u32, receiver: &mut R) {
        debug_assert!(self.check_key(key).is_ok());
        if let Some(v) = self.ints.get(key) {
            receiver.on_int(*v);
        } else if let Some(v) = self.floats.get(key) {
            receiver.on_float(*v);
        } else if let Some(v) = self.objects.get(key) {
            receiver.on_object(v);
        } else {
            receiver.on_null();
        }
    }

    pub fn read_value(&self, key: u32) -> Value {
        let mut capture = ValueCapture::default();
        self.get(key, &mut capture);
        capture.into_value()
    }

    /// Raw integer read: [`NULL_INT`] unless `key` holds an integer.
    pub fn read_int(&self, key: u32) -> i64 {
        self.ints.get(key).copied().unwrap_or(NULL_INT)
    }

    /// Raw float read: [`NULL_FLOAT`] unless `key` holds a float.
    pub fn read_float(&self, key: u32) -> f64 {
        self.floats.get(key).copied().unwrap_or(NULL_FLOAT)
    }

    pub fn contains_index(&self, key: u32) -> bool {
        self.ints.is_live(key) || self.floats.is_live(key) || self.objects.is_live(key)
    }

    pub fn is_null(&self, key: u32) -> bool {
        !self.contains_index(key)
    }

    /// Number of live keys.
    pub fn size(&self) -> usize {
        self.ints.live_count() + self.floats.live_count() + self.objects.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Live keys in ascending order.
    pub fn live_keys(&self) -> Vec<u32> {
        let upper = self
            .ints
            .values
            .len()
            .max(self.floats.values.len())
            .max(self.objects.values.len());
        (0..upper as u32).filter(|k| self.contains_index(*k)).collect()
    }

    /// Trim arena over-capacity and trailing holes, then run-length optimize the hole bitmaps.
    pub fn compact(&mut self) {
        self.ints.compact();
        self.floats.compact();
        self.objects.compact();
    }

    /// Deep copy. Later writes to either column never show through the other.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    fn check_key(&self, key: u32) -> Result<(), ColumnarError> {
        let live = [
            ("int", self.ints.is_live(key)),
            ("float", self.floats.is_live(key)),
            ("object", self.objects.is_live(key)),
        ];
        if live.iter().filter(|(_, l)| *l).count() > 1 {
            let arenas = live
                .iter()
                .filter(|(_, l)| *l)
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ColumnarError::KeyInSeveralArenas { key, arenas });
        }
        Ok(())
    }

    /// Check the single-arena invariant for every key.
    pub fn validate(&self) -> Result<(), ColumnarError> {
        let upper = self
            .ints
            .values
            .len()
            .max(self.floats.values.len())
            .max(self.objects.values.len());
        (0..upper as u32).try_for_each(|key| self.check_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Channels {
        ints: Vec<i64>,
        floats: Vec<f64>,
        objects: Vec<Value>,
        nulls: usize,
    }

    impl ValueReceiver for Channels {
        fn on_int(&mut self, value: i64) {
            self.ints.push(value);
        }
        fn on_float(&mut self, value: f64) {
            self.floats.push(value);
        }
        fn on_object(&mut self, value: &Value) {
            self.objects.push(value.clone());
        }
        fn on_null(&mut self) {
            self.nulls += 1;
        }
    }

    #[test]
    fn growth_backfills_holes() {
        let mut column = MultitypeColumn::new();
        column.set_int(5, 42);
        assert_eq!(column.size(), 1);
        for key in 0..5 {
            assert!(column.is_null(key));
        }
        assert_eq!(column.read_int(5), 42);
        assert_eq!(column.read_int(3), NULL_INT);
        assert!(column.read_float(5).is_nan());
    }

    #[test]
    fn type_change_clears_previous_arena() {
        let mut column = MultitypeColumn::new();
        column.set_int(0, 1);
        column.set_float(0, 2.5);
        column.set(0, Value::Text(Arc::from("x")));
        column.validate().unwrap();
        assert_eq!(column.size(), 1);

        let mut channels = Channels::default();
        column.get(0, &mut channels);
        column.get(7, &mut channels);
        assert!(channels.ints.is_empty());
        assert!(channels.floats.is_empty());
        assert_eq!(channels.objects, vec![Value::from("x")]);
        assert_eq!(channels.nulls, 1);

        column.set_int(0, 3);
        column.validate().unwrap();
        assert_eq!(column.read_value(0), Value::Int(3));
    }

    #[test]
    fn append_fails_on_conflict_by_default() {
        let mut column = MultitypeColumn::new();
        column.append(1, Value::Int(1)).unwrap();
        assert_eq!(
            column.append(1, Value::Int(2)),
            Err(ColumnarError::AlreadyPresent { key: 1 })
        );

        let mut overwrite = MultitypeColumn::with_conflict_policy(ConflictPolicy::Overwrite);
        overwrite.append(1, Value::Int(1)).unwrap();
        overwrite.append(1, Value::Int(2)).unwrap();
        assert_eq!(overwrite.read_value(1), Value::Int(2));
    }

    #[test]
    fn append_merge_accumulates() {
        let sum = |a: Value, b: Value| match (a, b) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (a, b) => Err(ColumnarError::Merge(format!("{a} + {b}"))),
        };
        let mut column = MultitypeColumn::new();
        column.append_merge(0, Value::Int(2), &sum).unwrap();
        column.append_merge(0, Value::Int(3), &sum).unwrap();
        assert_eq!(column.read_value(0), Value::Int(5));
        assert!(column.append_merge(0, Value::from("a"), &sum).is_err());
    }

    #[test]
    fn compact_drops_trailing_holes() {
        let mut column = MultitypeColumn::new();
        for key in 0..100 {
            column.set_int(key, i64::from(key));
        }
        for key in 10..100 {
            column.remove(key);
        }
        column.compact();
        assert_eq!(column.size(), 10);
        assert_eq!(column.live_keys(), (0..10).collect::<Vec<_>>());
        column.set_int(50, 1);
        assert!(column.is_null(49));
        column.validate().unwrap();
    }
}
