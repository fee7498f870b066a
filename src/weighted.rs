//! Ratio-interval sampling.
//!
//! A [`WeightedSelector`] turns an ordered list of `(item, ratio)` pairs into a
//! table of half-open intervals laid end to end. A uniform draw in `[0, 1)` is
//! scaled by the sum of all ratios and mapped to the interval containing it,
//! so ratios do not need to sum to one.

use crate::errors::{ModelError, SamplingError};
use rand::Rng;

#[derive(Debug, Clone)]
struct Interval<T> {
    start: f64,
    end: f64,
    item: T,
}

/// Immutable interval table for weighted selection.
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    intervals: Vec<Interval<T>>,
    total: f64,
}

impl<T> WeightedSelector<T> {
    /// Build a selector from `(item, ratio)` pairs, in order.
    ///
    /// Every ratio must be finite and strictly positive, and at least one
    /// choice is required.
    pub fn new(choices: impl IntoIterator<Item = (T, f64)>) -> Result<Self, ModelError> {
        let mut intervals = Vec::new();
        let mut total = 0.0;

        for (index, (item, ratio)) in choices.into_iter().enumerate() {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(ModelError::InvalidRatio { index, ratio });
            }
            let start = total;
            total += ratio;
            intervals.push(Interval {
                start,
                end: total,
                item,
            });
        }

        if intervals.is_empty() {
            return Err(ModelError::EmptyChoices);
        }

        Ok(Self { intervals, total })
    }

    /// Build a selector where every item has the same ratio.
    pub fn uniform(items: impl IntoIterator<Item = T>) -> Result<Self, ModelError> {
        Self::new(items.into_iter().map(|item| (item, 1.0)))
    }

    /// Select the item whose interval contains `draw * total`.
    ///
    /// `draw` must lie in `[0, 1)`; anything else means the random source is
    /// broken and is reported as a [`SamplingError`].
    pub fn select(&self, draw: f64) -> Result<&T, SamplingError> {
        if !(0.0..1.0).contains(&draw) {
            return Err(SamplingError::DrawOutOfRange(draw));
        }
        Ok(self.locate(draw * self.total))
    }

    /// Draw from `rng` and select the matching item.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        let draw: f64 = rng.random();
        self.locate(draw * self.total)
    }

    fn locate(&self, value: f64) -> &T {
        // First interval whose end lies strictly above `value`. A value on an
        // edge belongs to the interval starting there.
        let idx = self.intervals.partition_point(|iv| iv.end <= value);
        // `draw * total` can round up to `total` for draws just below one.
        let idx = idx.min(self.intervals.len() - 1);
        &self.intervals[idx].item
    }

    /// Sum of all ratios.
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Items in configuration order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.intervals.iter().map(|iv| &iv.item)
    }

    /// `(item, start, end)` triples of the interval table.
    pub fn intervals(&self) -> impl Iterator<Item = (&T, f64, f64)> {
        self.intervals.iter().map(|iv| (&iv.item, iv.start, iv.end))
    }
}
