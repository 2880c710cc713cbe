//! Viewport seam and the in-memory scene shipped with the crate.
//!
//! The pipeline talks to a [`Viewport`] only through `show` and `remove`.
//! [`SceneViewport`] keeps one entity per slot; showing a slot again swaps
//! the entity's geometry in place, so the entity id (display identity) is
//! stable across rebuilds.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::geometry::{Bounds, Solid};
use crate::slots::{Presentation, SlotKey};

/// Where published geometry ends up.
pub trait Viewport {
    /// Display `solid` in the slot `key`, replacing whatever it showed.
    fn show(&self, key: &SlotKey, solid: &Solid, presentation: &Presentation);

    /// Stop displaying `key`.
    fn remove(&self, key: &SlotKey);
}

/// Unique identifier for scene entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntityId(pub u64);

/// A displayed slot.
#[derive(Debug, Clone)]
pub struct SceneEntity {
    pub id: EntityId,
    pub geometry: Solid,
    pub presentation: Presentation,
    /// How many times the slot was shown, first display included.
    pub shows: usize,
}

/// Serializable view of one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub slot: SlotKey,
    pub id: EntityId,
    pub label: Option<String>,
    pub color: [f32; 4],
    pub visible: bool,
    pub parts: usize,
    pub bounds: Option<Bounds>,
    pub shows: usize,
}

#[derive(Debug, Default)]
struct Scene {
    entities: HashMap<SlotKey, SceneEntity>,
    /// Slots in the order they first appeared.
    order: Vec<SlotKey>,
    next_id: u64,
    removed: usize,
}

impl Scene {
    fn new_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }
}

/// Shared handle to an in-memory scene. Clones see the same scene.
#[derive(Debug, Clone, Default)]
pub struct SceneViewport {
    scene: Rc<RefCell<Scene>>,
}

impl SceneViewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity currently displayed for `key`.
    pub fn get(&self, key: &SlotKey) -> Option<SceneEntity> {
        self.scene.borrow().entities.get(key).cloned()
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.scene.borrow().entities.contains_key(key)
    }

    /// Times `key` was shown, 0 if it is not displayed.
    pub fn show_count(&self, key: &SlotKey) -> usize {
        self.scene.borrow().entities.get(key).map_or(0, |e| e.shows)
    }

    /// Displayed slots in scene order.
    pub fn keys(&self) -> Vec<SlotKey> {
        self.scene.borrow().order.clone()
    }

    pub fn len(&self) -> usize {
        self.scene.borrow().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entities removed over the scene's lifetime.
    pub fn removed_count(&self) -> usize {
        self.scene.borrow().removed
    }

    pub fn summary(&self) -> Vec<EntitySummary> {
        let scene = self.scene.borrow();
        scene
            .order
            .iter()
            .filter_map(|key| scene.entities.get(key).map(|e| (key, e)))
            .map(|(key, e)| EntitySummary {
                slot: key.clone(),
                id: e.id,
                label: e.presentation.label.clone(),
                color: e.presentation.color,
                visible: e.presentation.visible,
                parts: e.geometry.parts().len(),
                bounds: e.geometry.bounds(),
                shows: e.shows,
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut scene = self.scene.borrow_mut();
        scene.removed += scene.order.len();
        scene.entities.clear();
        scene.order.clear();
    }
}

impl Viewport for SceneViewport {
    fn show(&self, key: &SlotKey, solid: &Solid, presentation: &Presentation) {
        let mut scene = self.scene.borrow_mut();
        if let Some(entity) = scene.entities.get_mut(key) {
            entity.geometry = solid.clone();
            entity.presentation = presentation.clone();
            entity.shows += 1;
            return;
        }

        let id = scene.new_id();
        scene.entities.insert(
            key.clone(),
            SceneEntity {
                id,
                geometry: solid.clone(),
                presentation: presentation.clone(),
                shows: 1,
            },
        );
        scene.order.push(key.clone());
    }

    fn remove(&self, key: &SlotKey) {
        let mut scene = self.scene.borrow_mut();
        if scene.entities.remove(key).is_some() {
            scene.order.retain(|k| k != key);
            scene.removed += 1;
        }
    }
}
