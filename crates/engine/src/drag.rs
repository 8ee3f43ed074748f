use tracing::debug;

use assetline_core::{Category, EntityId, MutationDescriptor};

use crate::cache::EntityCache;
use crate::error::EngineError;
use crate::speculate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSession {
    pub entity_id: EntityId,
    pub source_category: Category,
    pub source_index: usize,
    /// Lane the pointer is currently over.
    pub over: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragPhase {
    #[default]
    Idle,
    Dragging(DragSession),
    DragOver(DragSession),
    Dropped,
    Cancelled,
}

impl DragPhase {
    fn session(&self) -> Option<&DragSession> {
        match self {
            Self::Dragging(session) | Self::DragOver(session) => Some(session),
            _ => None,
        }
    }
}

/// Where a card was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// Directly over another card: insert before it.
    Entity(EntityId),
    /// Empty space in a lane: append.
    Lane(Category),
}

/// Turns a drag gesture into at most one mutation.
///
/// Crossing lanes mid-drag moves the card in the cache as a local preview.
/// Nothing is dispatched until the drop, and a cancelled drag puts the card
/// back where it started without involving the snapshot manager.
#[derive(Debug, Default)]
pub struct DragController {
    phase: DragPhase,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase.session().is_some()
    }

    pub fn begin(&mut self, cache: &EntityCache, entity_id: &EntityId) -> Result<(), EngineError> {
        if let Some(session) = self.phase.session() {
            return Err(EngineError::DragInProgress(session.entity_id.to_string()));
        }
        let (source_category, source_index) = cache
            .view()
            .position(entity_id)
            .ok_or_else(|| EngineError::EntityNotFound(entity_id.to_string()))?;

        debug!(%entity_id, category = %source_category, index = source_index, "drag started");
        self.phase = DragPhase::Dragging(DragSession {
            entity_id: entity_id.clone(),
            over: source_category.clone(),
            source_category,
            source_index,
        });
        Ok(())
    }

    /// The pointer entered `category`'s drop zone.
    pub fn drag_over(
        &mut self,
        cache: &mut EntityCache,
        category: &Category,
    ) -> Result<(), EngineError> {
        let mut session = self.phase.session().cloned().ok_or(EngineError::NoActiveDrag)?;
        if !cache.view().has_category(category) {
            return Err(EngineError::UnknownCategory(category.to_string()));
        }
        if session.over != *category {
            let view = if *category == session.source_category {
                speculate::place(
                    cache.view(),
                    &session.entity_id,
                    &session.source_category,
                    session.source_index,
                )
            } else {
                speculate::recategorize(cache.view(), &session.entity_id, category, None)
            };
            cache.set_view(view);
            session.over = category.clone();
        }
        self.phase = DragPhase::DragOver(session);
        Ok(())
    }

    /// Finish the gesture. `None` means the card was released outside any
    /// target. Returns the mutation to commit, if the card actually moved.
    pub fn drop(
        &mut self,
        cache: &mut EntityCache,
        target: Option<DropTarget>,
    ) -> Result<Option<MutationDescriptor>, EngineError> {
        let session = self.phase.session().cloned().ok_or(EngineError::NoActiveDrag)?;
        Self::undo_preview(cache, &session);

        let Some(target) = target else {
            debug!(entity_id = %session.entity_id, "drag released outside any target");
            self.phase = DragPhase::Cancelled;
            return Ok(None);
        };

        let id = &session.entity_id;
        let (category, index) = match &target {
            DropTarget::Entity(over) if over == id => {
                self.phase = DragPhase::Dropped;
                return Ok(None);
            }
            DropTarget::Entity(over) => {
                let (category, _) = cache
                    .view()
                    .position(over)
                    .ok_or_else(|| EngineError::EntityNotFound(over.to_string()))?;
                let index = cache
                    .by_category(&category)
                    .iter()
                    .filter(|e| e.id != *id)
                    .position(|e| e.id == *over)
                    .unwrap_or(0);
                (category, Some(index))
            }
            DropTarget::Lane(category) => {
                if !cache.view().has_category(category) {
                    self.phase = DragPhase::Cancelled;
                    return Err(EngineError::UnknownCategory(category.to_string()));
                }
                (category.clone(), None)
            }
        };
        self.phase = DragPhase::Dropped;

        if category != session.source_category {
            debug!(entity_id = %id, to = %category, "drop recategorizes");
            return Ok(Some(MutationDescriptor::recategorize(id.clone(), category, index)));
        }

        let last = cache.by_category(&category).len().saturating_sub(1);
        let index = index.unwrap_or(last);
        if index == session.source_index {
            debug!(entity_id = %id, "drop at source slot, nothing to commit");
            return Ok(None);
        }
        debug!(entity_id = %id, from = session.source_index, to = index, "drop reorders");
        Ok(Some(MutationDescriptor::reorder(id.clone(), category, index)))
    }

    /// Abandon the gesture and put the card back.
    pub fn cancel(&mut self, cache: &mut EntityCache) -> Result<(), EngineError> {
        let session = self.phase.session().cloned().ok_or(EngineError::NoActiveDrag)?;
        Self::undo_preview(cache, &session);
        debug!(entity_id = %session.entity_id, "drag cancelled");
        self.phase = DragPhase::Cancelled;
        Ok(())
    }

    /// Take the preview out of the cache so other changes land on the real
    /// layout. Follow with [`DragController::reanchor`].
    pub fn lift_preview(&self, cache: &mut EntityCache) {
        if let Some(session) = self.phase.session() {
            Self::undo_preview(cache, session);
        }
    }

    /// Pick up wherever the dragged card rests now and put the preview back.
    /// A settle or reload may have moved it since the drag began.
    pub fn reanchor(&mut self, cache: &mut EntityCache) {
        let Some(mut session) = self.phase.session().cloned() else {
            return;
        };
        let Some((category, index)) = cache.view().position(&session.entity_id) else {
            debug!(entity_id = %session.entity_id, "dragged entity left the cache, drag cancelled");
            self.phase = DragPhase::Cancelled;
            return;
        };
        if category != session.source_category || index != session.source_index {
            debug!(
                entity_id = %session.entity_id,
                %category,
                index,
                "drag source moved under the gesture"
            );
            session.source_category = category;
            session.source_index = index;
        }
        if matches!(self.phase, DragPhase::Dragging(_)) {
            session.over = session.source_category.clone();
        }
        if session.over != session.source_category {
            let view = speculate::recategorize(cache.view(), &session.entity_id, &session.over, None);
            cache.set_view(view);
        }
        self.phase = match self.phase {
            DragPhase::Dragging(_) => DragPhase::Dragging(session),
            _ => DragPhase::DragOver(session),
        };
    }

    fn undo_preview(cache: &mut EntityCache, session: &DragSession) {
        if session.over == session.source_category {
            return;
        }
        let view = speculate::place(
            cache.view(),
            &session.entity_id,
            &session.source_category,
            session.source_index,
        );
        cache.set_view(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetline_core::{Entity, MutationKind};

    fn board() -> EntityCache {
        let mut cache = EntityCache::with_columns(vec![
            "Open".into(),
            "In Progress".into(),
            "Completed".into(),
        ]);
        cache.replace_all(vec![
            Entity::new("wo-1", "Open"),
            Entity::new("wo-2", "Open"),
            Entity::new("wo-3", "Open"),
            Entity::new("wo-4", "In Progress"),
        ]);
        cache
    }

    fn ids(cache: &EntityCache, category: &str) -> Vec<String> {
        cache
            .by_category(&category.into())
            .iter()
            .map(|e| e.id.to_string())
            .collect()
    }

    #[test]
    fn drag_over_previews_locally_and_back() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-2".into())?;

        drag.drag_over(&mut cache, &"In Progress".into())?;
        assert_eq!(ids(&cache, "In Progress"), vec!["wo-4", "wo-2"]);

        drag.drag_over(&mut cache, &"Open".into())?;
        assert_eq!(ids(&cache, "Open"), vec!["wo-1", "wo-2", "wo-3"]);
        assert!(matches!(drag.phase(), DragPhase::DragOver(_)));
        Ok(())
    }

    #[test]
    fn only_one_drag_at_a_time() -> Result<(), Box<dyn std::error::Error>> {
        let cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-1".into())?;
        assert!(matches!(
            drag.begin(&cache, &"wo-2".into()),
            Err(EngineError::DragInProgress(_))
        ));
        Ok(())
    }

    #[test]
    fn drop_over_lane_appends_across_categories() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-1".into())?;
        drag.drag_over(&mut cache, &"Completed".into())?;

        let desc = drag
            .drop(&mut cache, Some(DropTarget::Lane("Completed".into())))?
            .ok_or("expected a mutation")?;
        assert_eq!(
            desc.kind(),
            &MutationKind::Recategorize {
                target: "Completed".into(),
                index: None
            }
        );
        // the preview is undone; the dispatcher applies the real change
        assert_eq!(ids(&cache, "Open"), vec!["wo-1", "wo-2", "wo-3"]);
        assert_eq!(drag.phase(), &DragPhase::Dropped);
        Ok(())
    }

    #[test]
    fn drop_over_entity_inserts_before_it() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-3".into())?;
        drag.drag_over(&mut cache, &"In Progress".into())?;
        let desc = drag
            .drop(&mut cache, Some(DropTarget::Entity("wo-4".into())))?
            .ok_or("expected a mutation")?;
        assert_eq!(
            desc.kind(),
            &MutationKind::Recategorize {
                target: "In Progress".into(),
                index: Some(0)
            }
        );
        Ok(())
    }

    #[test]
    fn same_lane_drop_reorders() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-3".into())?;
        let desc = drag
            .drop(&mut cache, Some(DropTarget::Entity("wo-1".into())))?
            .ok_or("expected a mutation")?;
        assert_eq!(
            desc.kind(),
            &MutationKind::Reorder {
                category: "Open".into(),
                target_index: 0
            }
        );
        Ok(())
    }

    #[test]
    fn drop_at_source_slot_issues_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();

        drag.begin(&cache, &"wo-2".into())?;
        assert_eq!(drag.drop(&mut cache, Some(DropTarget::Entity("wo-3".into())))?, None);

        drag.begin(&cache, &"wo-3".into())?;
        assert_eq!(drag.drop(&mut cache, Some(DropTarget::Lane("Open".into())))?, None);

        drag.begin(&cache, &"wo-1".into())?;
        assert_eq!(drag.drop(&mut cache, Some(DropTarget::Entity("wo-1".into())))?, None);
        Ok(())
    }

    #[test]
    fn cancel_restores_pre_drag_state() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let before = cache.view().clone();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-1".into())?;
        drag.drag_over(&mut cache, &"Completed".into())?;
        drag.cancel(&mut cache)?;

        assert_eq!(cache.view(), &before);
        assert_eq!(drag.phase(), &DragPhase::Cancelled);
        assert!(matches!(drag.cancel(&mut cache), Err(EngineError::NoActiveDrag)));
        Ok(())
    }

    #[test]
    fn release_outside_targets_cancels() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-1".into())?;
        drag.drag_over(&mut cache, &"In Progress".into())?;
        assert_eq!(drag.drop(&mut cache, None)?, None);
        assert_eq!(ids(&cache, "In Progress"), vec!["wo-4"]);
        assert_eq!(drag.phase(), &DragPhase::Cancelled);
        Ok(())
    }

    #[test]
    fn reanchor_follows_a_card_moved_under_the_preview() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-4".into())?;
        drag.drag_over(&mut cache, &"Completed".into())?;

        // a rollback sends the card back to Open while the preview is lifted
        drag.lift_preview(&mut cache);
        assert_eq!(ids(&cache, "In Progress"), vec!["wo-4"]);
        let view = speculate::place(cache.view(), &"wo-4".into(), &"Open".into(), 0);
        cache.set_view(view);
        drag.reanchor(&mut cache);
        assert_eq!(ids(&cache, "Completed"), vec!["wo-4"]);

        let desc = drag
            .drop(&mut cache, Some(DropTarget::Lane("Completed".into())))?
            .ok_or("expected a mutation")?;
        assert_eq!(ids(&cache, "Open"), vec!["wo-4", "wo-1", "wo-2", "wo-3"]);
        assert!(ids(&cache, "In Progress").is_empty());
        assert_eq!(
            desc.kind(),
            &MutationKind::Recategorize {
                target: "Completed".into(),
                index: None
            }
        );
        Ok(())
    }

    #[test]
    fn reanchor_cancels_when_the_card_disappears() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-4".into())?;
        cache.replace_all(vec![Entity::new("wo-1", "Open")]);
        drag.reanchor(&mut cache);
        assert_eq!(drag.phase(), &DragPhase::Cancelled);
        Ok(())
    }

    #[test]
    fn unknown_lane_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let mut cache = board();
        let mut drag = DragController::new();
        drag.begin(&cache, &"wo-1".into())?;
        assert!(matches!(
            drag.drag_over(&mut cache, &"Archived".into()),
            Err(EngineError::UnknownCategory(_))
        ));
        assert!(drag.is_active());
        Ok(())
    }
}
