use crate::{ColumnarError, Slice};
use ahash::AHashMap;

/// Interns slices to dense `u32` keys.
///
/// Keys are handed out in first-seen order and are never reused, so a key stays valid for the
/// lifetime of the dictionary even when the value stored under it is removed.
#[derive(Clone, Debug, Default)]
pub struct SliceDictionary {
    slices: Vec<Slice>,
    keys: AHashMap<Slice, u32>,
}

impl SliceDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slices: Vec::with_capacity(capacity),
            keys: AHashMap::with_capacity(capacity),
        }
    }

    /// Returns the key of `slice`, interning it if needed. The flag is `true` for a new slice.
    pub fn intern(&mut self, slice: &Slice) -> Result<(u32, bool), ColumnarError> {
        if let Some(key) = self.keys.get(slice) {
            return Ok((*key, false));
        }
        let key = u32::try_from(self.slices.len()).map_err(|_| ColumnarError::KeySpaceExhausted)?;
        self.slices.push(slice.clone());
        self.keys.insert(slice.clone(), key);
        Ok((key, true))
    }

    pub fn key_of(&self, slice: &Slice) -> Option<u32> {
        self.keys.get(slice).copied()
    }

    pub fn slice(&self, key: u32) -> Option<&Slice> {
        self.slices.get(key as usize)
    }

    /// Number of interned slices, including slices whose value was removed.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn shrink_to_fit(&mut self) {
        self.slices.shrink_to_fit();
        self.keys.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;

    #[test]
    fn interning_is_stable() {
        let mut dict = SliceDictionary::new();
        let a = Slice::from_pairs([("ccy", Coordinate::from("EUR"))]);
        let b = Slice::from_pairs([("ccy", Coordinate::from("USD"))]);
        assert_eq!(dict.intern(&a).unwrap(), (0, true));
        assert_eq!(dict.intern(&b).unwrap(), (1, true));
        assert_eq!(dict.intern(&a).unwrap(), (0, false));
        assert_eq!(dict.slice(1), Some(&b));
        assert_eq!(dict.key_of(&Slice::grand_total()), None);
    }
}
