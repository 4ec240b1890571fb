/// A dense, fixed-length row selection.
///
/// Bit 0 is the LSB of word 0. Bits past `len` in the last word stay zero.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a selection of `bits` rows where row `i` is selected iff `predicate(i)`.
    pub fn from_fn(bits: usize, mut predicate: impl FnMut(usize) -> bool) -> Self {
        let mut words = vec![0u64; bits.div_ceil(64)];
        let mut ones = 0;
        for row in (0..bits).filter(|row| predicate(*row)) {
            words[row / 64] |= 1u64 << (row % 64);
            ones += 1;
        }
        Self {
            words,
            len: bits,
            ones,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of selected rows.
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn contains(&self, row: usize) -> bool {
        row < self.len && (self.words[row / 64] >> (row % 64)) & 1 == 1
    }

    /// Selected rows in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}
