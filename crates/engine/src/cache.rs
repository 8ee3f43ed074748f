use std::sync::Arc;

use assetline_core::{Category, Entity, EntityId, EntityPatch};

/// One category's entities in display order. Shared between successive views
/// so an untouched lane stays pointer-equal.
pub type Lane = Arc<Vec<Entity>>;

/// The rendered view of a collection: entities grouped into ordered lanes.
///
/// Values are immutable once built; every change produces a new view that
/// shares all lanes it did not touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedView {
    pub(crate) lanes: Vec<(Category, Lane)>,
}

impl GroupedView {
    /// Group `entities` by category. `columns` are laid out first (and kept
    /// even when empty); categories seen only on entities follow in
    /// first-seen order.
    pub fn from_entities<I>(columns: &[Category], entities: I) -> Self
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut lanes: Vec<(Category, Vec<Entity>)> =
            columns.iter().map(|c| (c.clone(), Vec::new())).collect();
        for entity in entities {
            match lanes.iter_mut().find(|(c, _)| *c == entity.category) {
                Some((_, lane)) => lane.push(entity),
                None => lanes.push((entity.category.clone(), vec![entity])),
            }
        }
        Self {
            lanes: lanes.into_iter().map(|(c, l)| (c, Arc::new(l))).collect(),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> + '_ {
        self.lanes.iter().map(|(c, _)| c)
    }

    pub fn has_category(&self, category: &Category) -> bool {
        self.lanes.iter().any(|(c, _)| c == category)
    }

    /// Entities in `category`, empty when the lane does not exist.
    pub fn lane(&self, category: &Category) -> &[Entity] {
        self.lane_arc(category).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn lane_arc(&self, category: &Category) -> Option<&Lane> {
        self.lanes.iter().find(|(c, _)| c == category).map(|(_, l)| l)
    }

    /// (lane position, index within lane)
    pub(crate) fn locate(&self, id: &EntityId) -> Option<(usize, usize)> {
        self.lanes.iter().enumerate().find_map(|(lane_pos, (_, lane))| {
            lane.iter().position(|e| e.id == *id).map(|idx| (lane_pos, idx))
        })
    }

    /// Category and index the entity is currently rendered at.
    pub fn position(&self, id: &EntityId) -> Option<(Category, usize)> {
        self.locate(id)
            .map(|(lane_pos, idx)| (self.lanes[lane_pos].0.clone(), idx))
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.locate(id).map(|(lane_pos, idx)| &self.lanes[lane_pos].1[idx])
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.lanes.iter().flat_map(|(_, lane)| lane.iter())
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|(_, l)| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both views share every lane allocation, i.e. nothing that a
    /// renderer could observe has changed.
    pub fn same_as(&self, other: &GroupedView) -> bool {
        self.lanes.len() == other.lanes.len()
            && self
                .lanes
                .iter()
                .zip(other.lanes.iter())
                .all(|((ca, la), (cb, lb))| ca == cb && Arc::ptr_eq(la, lb))
    }
}

/// The single owned store the board and inventory views render from.
#[derive(Debug, Default)]
pub struct EntityCache {
    columns: Vec<Category>,
    view: GroupedView,
    version: u64,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board columns that exist even when empty, in display order.
    pub fn with_columns(columns: Vec<Category>) -> Self {
        let view = GroupedView::from_entities(&columns, Vec::new());
        Self {
            columns,
            view,
            version: 0,
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.view.get(id)
    }

    pub fn by_category(&self, category: &Category) -> &[Entity] {
        self.view.lane(category)
    }

    pub fn view(&self) -> &GroupedView {
        &self.view
    }

    pub fn columns(&self) -> &[Category] {
        &self.columns
    }

    /// Bumped on every visible change; dependent views re-render on change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn replace_all<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = Entity>,
    {
        let view = GroupedView::from_entities(&self.columns, entities);
        self.set_view(view);
    }

    /// Install a view computed elsewhere. A view sharing every lane with the
    /// current one is not a change.
    pub fn set_view(&mut self, view: GroupedView) {
        if view.same_as(&self.view) {
            return;
        }
        self.view = view;
        self.version += 1;
    }

    /// Apply a partial update. A category change moves the entity to the end
    /// of the target lane. Returns whether anything changed, so applying the
    /// same patch twice changes nothing the second time.
    pub fn patch(&mut self, id: &EntityId, patch: &EntityPatch) -> bool {
        let mut next = self.view.clone();
        if let Some(count) = patch.count {
            next = crate::speculate::set_count(&next, id, count);
        }
        if let Some(category) = &patch.category {
            next = crate::speculate::recategorize(&next, id, category, None);
        }
        let changed = !next.same_as(&self.view);
        self.set_view(next);
        changed
    }
}
