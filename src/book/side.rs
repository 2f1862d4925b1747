//! Per-side price level storage and the depth merge.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

/// A single price level: a price and the quantity resting at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    /// A level that may be stored in the book: finite positive price and
    /// finite strictly positive quantity.
    pub fn is_storable(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && self.quantity.is_finite()
            && self.quantity > 0.0
    }

    /// A delta that may enter the merge. Quantity zero is the deletion
    /// signal, so it is allowed here but never stored.
    pub fn is_valid_delta(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && self.quantity.is_finite()
            && self.quantity >= 0.0
    }
}

/// Which side of the book a ladder holds. Determines the sort direction:
/// bids best-first means descending price, asks ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Price ordering along this side, best level first.
    pub fn cmp_prices(self, a: f64, b: f64) -> Ordering {
        match self {
            Side::Bid => OrderedFloat(b).cmp(&OrderedFloat(a)),
            Side::Ask => OrderedFloat(a).cmp(&OrderedFloat(b)),
        }
    }
}

/// A delta batch was rejected before any mutation took place.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("malformed {side:?} delta: price {price}, quantity {quantity}")]
pub struct MalformedBatch {
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

/// One side of the book: a contiguous run of levels sorted best-first with
/// unique prices, bounded by the configured depth.
#[derive(Debug, Clone)]
pub struct Ladder {
    side: Side,
    max_depth: usize,
    levels: Vec<PriceLevel>,
}

impl Ladder {
    pub fn new(side: Side, max_depth: usize) -> Self {
        Self {
            side,
            max_depth,
            levels: Vec::with_capacity(max_depth),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PriceLevel> {
        self.levels.iter()
    }

    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    /// The best level on this side, if any.
    pub fn best(&self) -> Option<&PriceLevel> {
        self.levels.first()
    }

    /// Quantity currently resting at `price`, if the level exists.
    pub fn quantity_at(&self, price: f64) -> Option<f64> {
        let side = self.side;
        self.levels
            .binary_search_by(|level| side.cmp_prices(level.price, price))
            .ok()
            .map(|index| self.levels[index].quantity)
    }

    pub fn truncate(&mut self, len: usize) {
        self.levels.truncate(len);
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Re-impose the depth bound after a merge. Overrun is routine when a
    /// large diff lands on a full side; the tail is simply dropped.
    pub(crate) fn enforce_depth(&mut self) {
        self.levels.truncate(self.max_depth);
    }

    /// Drop the `n` best levels. Used by the cross repair.
    pub(crate) fn remove_best(&mut self, n: usize) {
        self.levels.drain(..n);
    }

    /// Replace the ladder contents from snapshot levels. Unstorable entries
    /// are filtered out, duplicate prices keep the last occurrence, and the
    /// result is sorted best-first and truncated to the depth bound.
    pub fn load(&mut self, entries: Vec<PriceLevel>) {
        let side = self.side;
        self.levels.clear();
        self.levels
            .extend(entries.into_iter().filter(PriceLevel::is_storable));
        self.levels
            .sort_by(|a, b| side.cmp_prices(a.price, b.price));
        self.levels.dedup_by(|later, kept| {
            if side.cmp_prices(later.price, kept.price) == Ordering::Equal {
                *kept = *later;
                true
            } else {
                false
            }
        });
        self.levels.truncate(self.max_depth);
    }

    /// Merge a batch of deltas into the ladder.
    ///
    /// The whole batch is screened first: any non-finite or non-positive
    /// price, or non-finite or negative quantity, rejects the batch without
    /// touching the ladder. Duplicate prices within the batch resolve
    /// last-wins. A delta with quantity zero deletes its level; deleting an
    /// absent price is a no-op.
    pub fn apply(&mut self, deltas: &[PriceLevel]) -> Result<(), MalformedBatch> {
        if let Some(bad) = deltas.iter().find(|delta| !delta.is_valid_delta()) {
            return Err(MalformedBatch {
                side: self.side,
                price: bad.price,
                quantity: bad.quantity,
            });
        }
        if deltas.is_empty() {
            return Ok(());
        }

        let side = self.side;
        let mut batch = deltas.to_vec();
        // The sort is stable, so equal prices keep their batch order and the
        // dedup below retains the last occurrence.
        batch.sort_by(|a, b| side.cmp_prices(a.price, b.price));
        batch.dedup_by(|later, kept| {
            if side.cmp_prices(later.price, kept.price) == Ordering::Equal {
                *kept = *later;
                true
            } else {
                false
            }
        });

        // Two-pointer merge of the existing run and the normalized batch.
        // One output buffer bounded by len(side) + len(batch) is the only
        // allocation on this path.
        let mut merged = Vec::with_capacity(self.levels.len() + batch.len());
        let mut i = 0;
        let mut j = 0;
        while i < self.levels.len() && j < batch.len() {
            match side.cmp_prices(self.levels[i].price, batch[j].price) {
                Ordering::Less => {
                    merged.push(self.levels[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    if batch[j].quantity > 0.0 {
                        merged.push(batch[j]);
                    }
                    j += 1;
                }
                Ordering::Equal => {
                    if batch[j].quantity > 0.0 {
                        merged.push(batch[j]);
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&self.levels[i..]);
        for delta in &batch[j..] {
            if delta.quantity > 0.0 {
                merged.push(*delta);
            }
        }
        merged.truncate(self.max_depth);

        self.levels = merged;
        Ok(())
    }
}
