//! Order maintenance for sibling sets.
//!
//! Every function here takes the siblings of a single parent scope and returns them sorted
//! and renumbered `0..N-1`. Input with gaps or duplicates is tolerated: it is stable-sorted by
//! its current `order` first, so callers that pre-sort on a tie-breaker keep that tie-breaker.

use serde::{Deserialize, Serialize};

use crate::{Ordered, ShelfError};

/// Which side of the drop target the dragged item lands on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Before,
    After,
}

/// Targeted-shift form of a reorder: siblings in `first..=last` move by `delta`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ShiftPlan {
    pub first: u32,
    pub last: u32,
    pub delta: i8,
}

impl ShiftPlan {
    #[must_use]
    pub fn contains(self, order: u32) -> bool {
        (self.first..=self.last).contains(&order)
    }

    /// New order for a sibling that is not the moved item.
    #[must_use]
    pub fn shifted(self, order: u32) -> u32 {
        if !self.contains(order) {
            return order;
        }
        if self.delta < 0 {
            order.saturating_sub(1)
        } else {
            order.saturating_add(1)
        }
    }
}

fn to_order(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

fn renumber<T: Ordered>(items: &mut [T]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.set_order(to_order(index));
    }
}

fn position<T: Ordered>(items: &[T], id: T::Id) -> Result<usize, ShelfError> {
    items
        .iter()
        .position(|item| item.id() == id)
        .ok_or_else(|| ShelfError::NotFound(format!("item {id} is not in this scope")))
}

/// Highest valid reorder position for a scope of `len` siblings.
#[must_use]
pub fn clamp_reorder_target(len: usize, target: u32) -> u32 {
    if len == 0 {
        return 0;
    }
    target.min(to_order(len - 1))
}

/// Insert position for a scope of `len` siblings; `None` appends.
#[must_use]
pub fn clamp_insert_target(len: usize, target: Option<u32>) -> u32 {
    let end = to_order(len);
    target.map_or(end, |target| target.min(end))
}

#[must_use]
pub fn is_contiguous<T: Ordered>(items: &[T]) -> bool {
    let mut orders = items.iter().map(Ordered::order).collect::<Vec<_>>();
    orders.sort_unstable();
    orders.iter().enumerate().all(|(index, order)| to_order(index) == *order)
}

/// Stable-sort by current order and renumber `0..N-1`.
#[must_use]
pub fn normalize<T: Ordered>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by_key(Ordered::order);
    renumber(&mut items);
    items
}

/// Move `id` to `target` (clamped to `[0, N-1]`) by removing and reinserting it.
///
/// # Errors
/// Returns [`ShelfError::NotFound`] when `id` is not one of the siblings.
pub fn reorder<T: Ordered>(items: Vec<T>, id: T::Id, target: u32) -> Result<Vec<T>, ShelfError> {
    let mut items = normalize(items);
    let index = position(&items, id)?;
    let target = clamp_reorder_target(items.len(), target) as usize;
    if index != target {
        let moved = items.remove(index);
        items.insert(target, moved);
        renumber(&mut items);
    }
    Ok(items)
}

/// Insert `item` at `target` (clamped to `[0, N]`), shifting later siblings up.
#[must_use]
pub fn insert_at<T: Ordered>(items: Vec<T>, mut item: T, target: Option<u32>) -> Vec<T> {
    let mut items = normalize(items);
    let index = clamp_insert_target(items.len(), target) as usize;
    item.set_order(0);
    items.insert(index, item);
    renumber(&mut items);
    items
}

/// Take `id` out of the scope and close the gap it leaves.
///
/// # Errors
/// Returns [`ShelfError::NotFound`] when `id` is not one of the siblings.
pub fn remove<T: Ordered>(items: Vec<T>, id: T::Id) -> Result<(T, Vec<T>), ShelfError> {
    let mut items = normalize(items);
    let index = position(&items, id)?;
    let removed = items.remove(index);
    renumber(&mut items);
    Ok((removed, items))
}

/// Decrement every sibling ordered after `removed_order`.
pub fn close_gap<T: Ordered>(items: &mut [T], removed_order: u32) {
    for item in items.iter_mut() {
        if item.order() > removed_order {
            item.set_order(item.order() - 1);
        }
    }
}

/// Sibling range and direction touched when an item moves from `current` to `target`.
#[must_use]
pub fn shift_plan(current: u32, target: u32) -> Option<ShiftPlan> {
    match current.cmp(&target) {
        std::cmp::Ordering::Less => Some(ShiftPlan { first: current + 1, last: target, delta: -1 }),
        std::cmp::Ordering::Greater => {
            Some(ShiftPlan { first: target, last: current - 1, delta: 1 })
        }
        std::cmp::Ordering::Equal => None,
    }
}

/// Translate a drag-and-drop intent into a numeric target order.
///
/// `dragged` is the dragged item's current order when it already lives in the target's
/// scope, `None` for a cross-scope drop.
#[must_use]
pub fn drop_order(dragged: Option<u32>, target: u32, placement: Placement) -> u32 {
    match (dragged, placement) {
        (Some(current), _) if current == target => target,
        (Some(current), Placement::Before) if current < target => target - 1,
        (Some(current), Placement::After) if current < target => target,
        (_, Placement::Before) => target,
        (_, Placement::After) => target.saturating_add(1),
    }
}

/// `(id, order)` pairs whose order differs between `before` and `after`.
#[must_use]
pub fn changed_orders<T: Ordered>(before: &[(T::Id, u32)], after: &[T]) -> Vec<(T::Id, u32)> {
    after
        .iter()
        .filter(|item| {
            !before.iter().any(|(id, order)| *id == item.id() && *order == item.order())
        })
        .map(|item| (item.id(), item.order()))
        .collect()
}

#[must_use]
pub fn order_snapshot<T: Ordered>(items: &[T]) -> Vec<(T::Id, u32)> {
    items.iter().map(|item| (item.id(), item.order())).collect()
}
