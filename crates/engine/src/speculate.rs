//! Pure view transforms. None of these touch the input view or the network;
//! lanes not involved in a change are shared with the input, and a change
//! that does nothing returns a view that is [`GroupedView::same_as`] the input.

use std::sync::Arc;

use assetline_core::{Category, CountChange, Entity, EntityId, MutationKind};

use crate::cache::GroupedView;

/// Remove the entity at `from`, let `edit` adjust it, and insert it into
/// `target` at `index` (clamped; `None` appends). Index is interpreted in the
/// target lane with the entity already removed.
fn relocate(
    view: &GroupedView,
    from: (usize, usize),
    target: &Category,
    index: Option<usize>,
    edit: impl FnOnce(&mut Entity),
) -> GroupedView {
    let (src_lane, src_idx) = from;
    let mut lanes = view.lanes.clone();
    let mut source: Vec<Entity> = lanes[src_lane].1.as_ref().clone();
    let mut entity = source.remove(src_idx);
    edit(&mut entity);
    entity.category = target.clone();

    let dest_lane = match lanes.iter().position(|(c, _)| c == target) {
        Some(pos) => pos,
        None => {
            lanes.push((target.clone(), Arc::new(Vec::new())));
            lanes.len() - 1
        }
    };

    if dest_lane == src_lane {
        let at = index.unwrap_or(source.len()).min(source.len());
        source.insert(at, entity);
        lanes[src_lane].1 = Arc::new(source);
    } else {
        let mut dest: Vec<Entity> = lanes[dest_lane].1.as_ref().clone();
        let at = index.unwrap_or(dest.len()).min(dest.len());
        dest.insert(at, entity);
        lanes[src_lane].1 = Arc::new(source);
        lanes[dest_lane].1 = Arc::new(dest);
    }

    GroupedView { lanes }
}

fn edit_in_place(
    view: &GroupedView,
    at: (usize, usize),
    edit: impl FnOnce(&mut Entity),
) -> GroupedView {
    let (lane_pos, idx) = at;
    let mut lanes = view.lanes.clone();
    let mut lane: Vec<Entity> = lanes[lane_pos].1.as_ref().clone();
    edit(&mut lane[idx]);
    lanes[lane_pos].1 = Arc::new(lane);
    GroupedView { lanes }
}

/// Move an entity into `target`. No-op when it is already there or unknown.
pub fn recategorize(
    view: &GroupedView,
    id: &EntityId,
    target: &Category,
    index: Option<usize>,
) -> GroupedView {
    match view.locate(id) {
        Some((lane_pos, _)) if view.lanes[lane_pos].0 == *target => view.clone(),
        Some(at) => relocate(view, at, target, index, |_| {}),
        None => view.clone(),
    }
}

/// Move an entity to `target_index` within `category`. Unchanged when the
/// entity is not currently in `category`.
pub fn reorder_within_category(
    view: &GroupedView,
    id: &EntityId,
    category: &Category,
    target_index: usize,
) -> GroupedView {
    let Some((lane_pos, idx)) = view.locate(id) else {
        return view.clone();
    };
    if view.lanes[lane_pos].0 != *category {
        return view.clone();
    }
    let last = view.lanes[lane_pos].1.len() - 1;
    let to = target_index.min(last);
    if to == idx {
        return view.clone();
    }
    relocate(view, (lane_pos, idx), category, Some(to), |_| {})
}

/// Apply a counter change. Entities without a count are left alone.
pub fn adjust_count(view: &GroupedView, id: &EntityId, change: CountChange) -> GroupedView {
    let Some(at) = view.locate(id) else {
        return view.clone();
    };
    let Some(current) = view.lanes[at.0].1[at.1].count else {
        return view.clone();
    };
    let next = change.apply(current);
    if next == current {
        return view.clone();
    }
    edit_in_place(view, at, |e| e.count = Some(next))
}

/// Overwrite a counted entity's quantity with a known value.
pub fn set_count(view: &GroupedView, id: &EntityId, count: u64) -> GroupedView {
    match view.locate(id) {
        Some(at) if view.lanes[at.0].1[at.1].count.is_some_and(|c| c != count) => {
            edit_in_place(view, at, |e| e.count = Some(count))
        }
        _ => view.clone(),
    }
}

/// Put an entity at an exact slot, whatever it went through since.
pub fn place(view: &GroupedView, id: &EntityId, category: &Category, index: usize) -> GroupedView {
    match view.locate(id) {
        Some((lane_pos, idx)) if view.lanes[lane_pos].0 == *category && idx == index => {
            view.clone()
        }
        Some(at) => relocate(view, at, category, Some(index), |_| {}),
        None => view.clone(),
    }
}

/// Dispatch a mutation kind to its transform.
pub fn apply(view: &GroupedView, id: &EntityId, kind: &MutationKind) -> GroupedView {
    match kind {
        MutationKind::Recategorize { target, index } => recategorize(view, id, target, *index),
        MutationKind::Reorder {
            category,
            target_index,
        } => reorder_within_category(view, id, category, *target_index),
        MutationKind::AdjustCount(change) => adjust_count(view, id, *change),
    }
}
