use ahash::AHashSet;
use slicer_columnar::{Cell, Slice, SliceColumn};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One output slice of a merge with the value of every leg at that slice.
#[derive(Clone, Debug)]
pub struct MergedSlice<'a> {
    pub slice: &'a Slice,
    /// One cell per leg, in leg order. A leg without the slice yields a null cell.
    pub values: SmallVec<[Cell<'a>; 4]>,
}

type Entries<'a> = Box<dyn Iterator<Item = (&'a Slice, u32)> + 'a>;
type Keys = SmallVec<[Option<u32>; 4]>;

/// Streams the union of the slices of several columns, each slice exactly once.
///
/// Sorted prefixes are k-way merged through a min-heap, so fully sorted inputs come out in
/// ascending slice order. Legs with an unsorted remainder are resolved by point lookup during
/// that pass, then their remainders are streamed, skipping slices already produced.
pub struct UnderlyingMerge<'a> {
    legs: Vec<&'a SliceColumn>,
    sorted: Vec<Entries<'a>>,
    heap: BinaryHeap<Reverse<(&'a Slice, usize, u32)>>,
    /// Only tracked when some leg has an unsorted remainder.
    seen: Option<AHashSet<&'a Slice>>,
    unsorted_leg: usize,
    unsorted: Option<Entries<'a>>,
}

impl<'a> UnderlyingMerge<'a> {
    pub fn new(legs: impl IntoIterator<Item = &'a SliceColumn>) -> Self {
        let legs: Vec<&'a SliceColumn> = legs.into_iter().collect();
        let sorted: Vec<Entries<'a>> = legs
            .iter()
            .map(|column| Box::new(column.iter_sorted()) as Entries<'a>)
            .collect();
        let seen = legs
            .iter()
            .any(|column| !column.is_sorted())
            .then(AHashSet::new);
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(legs.len()),
            legs,
            sorted,
            seen,
            unsorted_leg: 0,
            unsorted: None,
        };
        for leg in 0..merge.legs.len() {
            merge.advance(leg);
        }
        merge
    }

    /// Whether the output will come out in ascending slice order.
    pub fn is_ordered(&self) -> bool {
        self.seen.is_none()
    }

    fn advance(&mut self, leg: usize) {
        if let Some((slice, key)) = self.sorted[leg].next() {
            self.heap.push(Reverse((slice, leg, key)));
        }
    }

    /// Pop every leg parked on the minimum slice.
    fn pop_current_minimum(&mut self) -> Option<(&'a Slice, Keys, SmallVec<[usize; 4]>)> {
        let Reverse((slice, leg, key)) = self.heap.pop()?;
        let mut keys: Keys = SmallVec::from_elem(None, self.legs.len());
        let mut popped = SmallVec::new();
        keys[leg] = Some(key);
        popped.push(leg);
        while let Some(Reverse((next, _, _))) = self.heap.peek() {
            if *next != slice {
                break;
            }
            if let Some(Reverse((_, leg, key))) = self.heap.pop() {
                keys[leg] = Some(key);
                popped.push(leg);
            }
        }
        Some((slice, keys, popped))
    }

    /// Step every popped leg to its next entry.
    fn advance_all(&mut self, popped: &[usize]) -> SmallVec<[(&'a Slice, usize, u32); 4]> {
        popped
            .iter()
            .filter_map(|leg| {
                self.sorted[*leg]
                    .next()
                    .map(|(slice, key)| (slice, *leg, key))
            })
            .collect()
    }

    fn reinsert_all(&mut self, entries: SmallVec<[(&'a Slice, usize, u32); 4]>) {
        self.heap.extend(entries.into_iter().map(Reverse));
    }

    fn next_sorted(&mut self) -> Option<MergedSlice<'a>> {
        let (slice, mut keys, popped) = self.pop_current_minimum()?;
        let entries = self.advance_all(&popped);
        self.reinsert_all(entries);
        for (leg, column) in self.legs.iter().enumerate() {
            if keys[leg].is_none() && !column.is_sorted() {
                keys[leg] = column.key_of(slice);
            }
        }
        if let Some(seen) = &mut self.seen {
            seen.insert(slice);
        }
        Some(merged(&self.legs, slice, &keys))
    }

    fn next_unsorted(&mut self) -> Option<MergedSlice<'a>> {
        let seen = self.seen.as_mut()?;
        while let Some(column) = self.legs.get(self.unsorted_leg).copied() {
            let entries = self
                .unsorted
                .get_or_insert_with(|| Box::new(column.iter_unsorted()) as Entries<'a>);
            match entries.next() {
                Some((slice, _)) => {
                    if !seen.insert(slice) {
                        continue;
                    }
                    let keys: Keys = self.legs.iter().map(|leg| leg.key_of(slice)).collect();
                    return Some(merged(&self.legs, slice, &keys));
                }
                None => {
                    self.unsorted = None;
                    self.unsorted_leg += 1;
                }
            }
        }
        None
    }
}

fn merged<'a>(legs: &[&'a SliceColumn], slice: &'a Slice, keys: &Keys) -> MergedSlice<'a> {
    MergedSlice {
        slice,
        values: legs
            .iter()
            .zip(keys)
            .map(|(column, key)| column.cell(*key))
            .collect(),
    }
}

impl<'a> Iterator for UnderlyingMerge<'a> {
    type Item = MergedSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_sorted() {
            Some(merged) => Some(merged),
            None => self.next_unsorted(),
        }
    }
}
