//! Sibling ordering by numeric position.
//!
//! Positions are sparse: readers tolerate gaps and never assume contiguity.
//! New positions are computed between neighbours so untouched siblings keep
//! their values; `renumber` is the explicit fallback once the gap between two
//! neighbours can no longer be split.

use std::cmp::Ordering;

/// Spacing used for head/tail inserts and for renumbered lists.
pub const POSITION_STEP: f64 = 1024.0;

pub trait Positioned {
    fn position(&self) -> f64;
    fn set_position(&mut self, position: f64);
    /// Identity used to break ties between (erroneously) equal positions.
    fn ordering_id(&self) -> i64;
}

/// Ascending position, identity as tie-breaker.
pub fn compare_by_position<T: Positioned>(a: &T, b: &T) -> Ordering {
    a.position()
        .total_cmp(&b.position())
        .then_with(|| a.ordering_id().cmp(&b.ordering_id()))
}

pub fn sort_by_position<T: Positioned>(items: &mut [T]) {
    items.sort_by(compare_by_position);
}

pub fn is_sorted_by_position<T: Positioned>(items: &[T]) -> bool {
    items
        .windows(2)
        .all(|pair| compare_by_position(&pair[0], &pair[1]) != Ordering::Greater)
}

/// A position strictly between `before` and `after`.
///
/// Returns `None` when both neighbours exist and no representable value lies
/// strictly between them; the caller must renumber and retry.
pub fn position_between(before: Option<f64>, after: Option<f64>) -> Option<f64> {
    match (before, after) {
        (None, None) => Some(POSITION_STEP),
        (Some(low), None) => Some(low + POSITION_STEP),
        (None, Some(high)) => Some(high - POSITION_STEP),
        (Some(low), Some(high)) => {
            let mid = low + (high - low) / 2.0;
            if low < mid && mid < high {
                Some(mid)
            } else {
                None
            }
        }
    }
}

/// Position that places a new sibling at `index` of an already sorted list.
/// Indices past the end append.
pub fn position_for_index<T: Positioned>(sorted: &[T], index: usize) -> Option<f64> {
    let index = index.min(sorted.len());
    let before = index
        .checked_sub(1)
        .and_then(|i| sorted.get(i))
        .map(Positioned::position);
    let after = sorted.get(index).map(Positioned::position);
    position_between(before, after)
}

/// Like `position_for_index`, with `moving` excluded from the siblings first.
pub fn position_for_move<T: Positioned>(sorted: &[T], moving: i64, index: usize) -> Option<f64> {
    let siblings: Vec<f64> = sorted
        .iter()
        .filter(|item| item.ordering_id() != moving)
        .map(Positioned::position)
        .collect();
    let index = index.min(siblings.len());
    let before = index.checked_sub(1).map(|i| siblings[i]);
    let after = siblings.get(index).copied();
    position_between(before, after)
}

/// Sorts, then assigns evenly spaced integral positions (1024, 2048, ...).
pub fn renumber<T: Positioned>(items: &mut [T]) {
    sort_by_position(items);
    for (i, item) in items.iter_mut().enumerate() {
        item.set_position(POSITION_STEP * (i as f64 + 1.0));
    }
}
