use crate::multitype::{ConflictPolicy, MultitypeColumn};
use crate::value::{ValueMerger, ValueProvider, ValueReceiver};
use crate::{ColumnarError, Slice, SliceDictionary, Value};

/// The output of one query step: a `Slice -> Value` mapping.
///
/// Slices are interned to dense keys and values live in a [`MultitypeColumn`]. Keys are tracked
/// in two lists: a sorted prefix, extended whenever a new slice sorts after the last one in it,
/// and an unsorted remainder for everything else. Writers that produce slices in order (merges of
/// sorted inputs) therefore build fully sorted columns for free; the others pay for a
/// [`sorted`](SliceColumn::sorted) pass only when a consumer needs one.
#[derive(Clone, Debug, Default)]
pub struct SliceColumn {
    dictionary: SliceDictionary,
    values: MultitypeColumn,
    sorted_keys: Vec<u32>,
    unsorted_keys: Vec<u32>,
}

impl SliceColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conflict_policy(on_conflict: ConflictPolicy) -> Self {
        Self {
            values: MultitypeColumn::with_conflict_policy(on_conflict),
            ..Self::default()
        }
    }

    fn key_for_write(&mut self, slice: &Slice) -> Result<u32, ColumnarError> {
        let (key, fresh) = self.dictionary.intern(slice)?;
        if fresh {
            let extends_prefix = match self.sorted_keys.last() {
                Some(last) => self.dictionary.slice(*last).map_or(true, |last| last < slice),
                None => true,
            };
            if extends_prefix {
                self.sorted_keys.push(key);
            } else {
                self.unsorted_keys.push(key);
            }
        }
        Ok(key)
    }

    /// Overwrite the value of `slice`.
    pub fn put(&mut self, slice: &Slice, value: Value) -> Result<(), ColumnarError> {
        let key = self.key_for_write(slice)?;
        self.values.set(key, value);
        Ok(())
    }

    /// Write the value of `slice`, following the conflict policy when it is already present.
    pub fn append(&mut self, slice: &Slice, value: Value) -> Result<(), ColumnarError> {
        let key = self.key_for_write(slice)?;
        self.values.append(key, value)
    }

    /// Accumulate `value` into `slice` through `merger`.
    pub fn merge(
        &mut self,
        slice: &Slice,
        value: Value,
        merger: &dyn ValueMerger,
    ) -> Result<(), ColumnarError> {
        let key = self.key_for_write(slice)?;
        self.values.append_merge(key, value, merger)
    }

    pub fn remove(&mut self, slice: &Slice) -> bool {
        match self.dictionary.key_of(slice) {
            Some(key) => self.values.remove(key),
            None => false,
        }
    }

    pub fn get<R: ValueReceiver + ?Sized>(&self, slice: &Slice, receiver: &mut R) {
        match self.dictionary.key_of(slice) {
            Some(key) => self.values.get(key, receiver),
            None => receiver.on_null(),
        }
    }

    pub fn get_value(&self, slice: &Slice) -> Value {
        self.dictionary
            .key_of(slice)
            .map_or(Value::Null, |key| self.values.read_value(key))
    }

    /// Read by interned key, as yielded by the iterators.
    pub fn read<R: ValueReceiver + ?Sized>(&self, key: u32, receiver: &mut R) {
        self.values.get(key, receiver);
    }

    pub fn read_value(&self, key: u32) -> Value {
        self.values.read_value(key)
    }

    pub fn key_of(&self, slice: &Slice) -> Option<u32> {
        self.dictionary
            .key_of(slice)
            .filter(|key| self.values.contains_index(*key))
    }

    pub fn contains(&self, slice: &Slice) -> bool {
        self.key_of(slice).is_some()
    }

    /// Number of slices holding a non-null value.
    pub fn len(&self) -> usize {
        self.values.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slice sits in the sorted prefix.
    pub fn is_sorted(&self) -> bool {
        self.unsorted_keys.is_empty()
    }

    fn live<'a>(&'a self, keys: &'a [u32]) -> impl Iterator<Item = (&'a Slice, u32)> + 'a {
        keys.iter().filter_map(move |key| {
            if self.values.is_null(*key) {
                return None;
            }
            self.dictionary.slice(*key).map(|slice| (slice, *key))
        })
    }

    /// Live entries of the sorted prefix, in ascending slice order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&Slice, u32)> + '_ {
        self.live(&self.sorted_keys)
    }

    /// Live entries of the unsorted remainder, in insertion order.
    pub fn iter_unsorted(&self) -> impl Iterator<Item = (&Slice, u32)> + '_ {
        self.live(&self.unsorted_keys)
    }

    /// Every live entry: the sorted prefix, then the unsorted remainder.
    pub fn iter(&self) -> impl Iterator<Item = (&Slice, u32)> + '_ {
        self.iter_sorted().chain(self.iter_unsorted())
    }

    /// A fully sorted copy of this column, without removed slices.
    pub fn sorted(&self) -> Result<SliceColumn, ColumnarError> {
        if self.is_sorted() && self.dictionary.len() == self.len() {
            return Ok(self.duplicate());
        }
        let mut entries: Vec<(&Slice, u32)> = self.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut out = SliceColumn::with_conflict_policy(self.values.conflict_policy());
        out.dictionary = SliceDictionary::with_capacity(entries.len());
        out.sorted_keys.reserve(entries.len());
        for (slice, key) in entries {
            out.put(slice, self.values.read_value(key))?;
        }
        debug_assert!(out.is_sorted());
        Ok(out)
    }

    /// Materialize the column as `(slice, value)` pairs in slice order.
    pub fn to_sorted_vec(&self) -> Vec<(Slice, Value)> {
        let mut out: Vec<(Slice, Value)> = self
            .iter()
            .map(|(slice, key)| (slice.clone(), self.values.read_value(key)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn compact(&mut self) {
        self.values.compact();
        self.dictionary.shrink_to_fit();
        self.sorted_keys.shrink_to_fit();
        self.unsorted_keys.shrink_to_fit();
    }

    /// Deep copy; the two columns evolve independently afterwards.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn validate(&self) -> Result<(), ColumnarError> {
        self.values.validate()
    }

    /// Provider for the value of `key` in this column, or for null when `key` is `None`.
    pub fn cell(&self, key: Option<u32>) -> Cell<'_> {
        Cell { column: self, key }
    }
}

/// A borrowed view of one value of a [`SliceColumn`].
#[derive(Clone, Copy, Debug)]
pub struct Cell<'a> {
    column: &'a SliceColumn,
    key: Option<u32>,
}

impl Cell<'_> {
    pub fn is_null(&self) -> bool {
        self.key.map_or(true, |key| self.column.values.is_null(key))
    }
}

impl ValueProvider for Cell<'_> {
    fn accept(&self, receiver: &mut dyn ValueReceiver) {
        match self.key {
            Some(key) => self.column.values.get(key, receiver),
            None => receiver.on_null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;

    fn ccy(code: &str) -> Slice {
        Slice::from_pairs([("ccy", Coordinate::from(code))])
    }

    #[test]
    fn ordered_writes_stay_sorted() {
        let mut column = SliceColumn::new();
        for (code, v) in [("EUR", 1), ("GBP", 2), ("USD", 3)] {
            column.put(&ccy(code), Value::Int(v)).unwrap();
        }
        assert!(column.is_sorted());
        assert_eq!(column.iter_unsorted().count(), 0);

        column.put(&ccy("CHF"), Value::Int(4)).unwrap();
        assert!(!column.is_sorted());
        let tail: Vec<_> = column.iter_unsorted().map(|(s, _)| s.clone()).collect();
        assert_eq!(tail, vec![ccy("CHF")]);

        let sorted = column.sorted().unwrap();
        assert!(sorted.is_sorted());
        let order: Vec<_> = sorted.iter_sorted().map(|(s, _)| s.to_string()).collect();
        assert_eq!(order, ["{ccy=CHF}", "{ccy=EUR}", "{ccy=GBP}", "{ccy=USD}"]);
    }

    #[test]
    fn removed_slices_are_skipped() {
        let mut column = SliceColumn::new();
        column.put(&ccy("EUR"), Value::Int(1)).unwrap();
        column.put(&ccy("USD"), Value::Int(2)).unwrap();
        assert!(column.remove(&ccy("EUR")));
        assert!(!column.remove(&ccy("JPY")));
        assert_eq!(column.len(), 1);
        assert!(!column.contains(&ccy("EUR")));
        assert_eq!(column.get_value(&ccy("EUR")), Value::Null);
        assert_eq!(column.iter().count(), 1);
        assert_eq!(column.sorted().unwrap().len(), 1);
    }

    #[test]
    fn cell_provides_null_for_missing_keys() {
        let mut column = SliceColumn::new();
        column.put(&ccy("EUR"), Value::Float(0.5)).unwrap();
        let key = column.key_of(&ccy("EUR"));
        assert_eq!(column.cell(key).to_value(), Value::Float(0.5));
        assert!(column.cell(None).is_null());
        assert_eq!(column.cell(None).to_value(), Value::Null);
    }
}
