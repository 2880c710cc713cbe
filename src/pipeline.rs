//! Rebuild pipeline and display slot manager.
//!
//! Scripts publish build outputs into slots. A slot bound to a parameter
//! tree is subscribed to the tree's root change stream; a change only
//! schedules the slot, and [`RebuildPipeline::flush`] (run once at the end of
//! every event-loop turn) rebuilds each scheduled slot at most once. That is
//! the whole debounce: however many edits land in one turn, the build sees
//! them all in a single run.
//!
//! Evaluation passes are bracketed by [`RebuildPipeline::begin_pass`] and
//! [`RebuildPipeline::end_pass`]; slots the pass did not publish are swept.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use serde::Serialize;

use crate::error::{ParamError, Result};
use crate::geometry::Solid;
use crate::script_diagnostics::{from_param_error, Diagnostics, ScriptPhase};
use crate::slots::{DisplaySlot, Presentation, PublishOptions, SlotKey};
use crate::viewport::Viewport;

/// Slots waiting for a rebuild, in scheduling order.
#[derive(Debug, Default)]
struct RebuildQueue {
    pending: Vec<SlotKey>,
}

impl RebuildQueue {
    fn schedule(&mut self, key: &SlotKey) {
        if !self.pending.contains(key) {
            self.pending.push(key.clone());
        }
    }

    fn cancel(&mut self, key: &SlotKey) {
        self.pending.retain(|k| k != key);
    }

    fn take(&mut self) -> Vec<SlotKey> {
        std::mem::take(&mut self.pending)
    }
}

#[derive(Debug, Default)]
struct PassState {
    published: HashSet<SlotKey>,
    next_index: usize,
}

/// Outcome of one [`RebuildPipeline::flush`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    pub rebuilt: Vec<SlotKey>,
    /// Rebuilds that failed; their previous geometry is still displayed.
    pub failed: Vec<SlotKey>,
    /// Bound slots without a build closure. Only a fresh evaluation pass can
    /// update them.
    pub stale: Vec<SlotKey>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.rebuilt.is_empty() && self.failed.is_empty() && self.stale.is_empty()
    }
}

pub struct RebuildPipeline {
    slots: RefCell<BTreeMap<SlotKey, DisplaySlot>>,
    queue: Rc<RefCell<RebuildQueue>>,
    viewport: Rc<dyn Viewport>,
    diagnostics: Diagnostics,
    pass: RefCell<Option<PassState>>,
}

impl RebuildPipeline {
    pub fn new(viewport: Rc<dyn Viewport>, diagnostics: Diagnostics) -> Self {
        Self {
            slots: RefCell::default(),
            queue: Rc::default(),
            viewport,
            diagnostics,
            pass: RefCell::new(None),
        }
    }

    pub fn begin_pass(&self) {
        *self.pass.borrow_mut() = Some(PassState::default());
    }

    /// Finish a successful pass: tear down every slot it did not publish.
    /// Returns the swept keys.
    pub fn end_pass(&self) -> Vec<SlotKey> {
        let Some(pass) = self.pass.borrow_mut().take() else {
            return Vec::new();
        };

        let orphans: Vec<(SlotKey, DisplaySlot)> = {
            let mut slots = self.slots.borrow_mut();
            let keys: Vec<SlotKey> = slots
                .keys()
                .filter(|k| !pass.published.contains(*k))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| slots.remove(&k).map(|slot| (k, slot)))
                .collect()
        };

        let mut swept = Vec::with_capacity(orphans.len());
        for (key, slot) in orphans {
            self.queue.borrow_mut().cancel(&key);
            // Dropping the slot cancels its subscription.
            drop(slot);
            self.viewport.remove(&key);
            log::debug!("Swept orphan slot {key}");
            swept.push(key);
        }
        swept
    }

    /// Finish a failed pass. Nothing is swept.
    pub fn abort_pass(&self) {
        self.pass.borrow_mut().take();
    }

    pub fn in_pass(&self) -> bool {
        self.pass.borrow().is_some()
    }

    /// Display `geometry` in a slot and return the slot's key.
    ///
    /// The key is `options.name` if given, else the position of this call
    /// in the current pass. The first publish creates the slot; later ones
    /// replace the geometry, keep presentation fields `options` leaves
    /// unset, rebind the tree and build closure, and cancel a rebuild
    /// already scheduled for the slot.
    ///
    /// An `Err` geometry is reported as a [`ParamError::BuildFailure`]. An
    /// existing slot keeps what it shows. A new slot bound to a tree is kept
    /// unpopulated but subscribed, so the next change to the tree retries the
    /// build; an unbound one is not created.
    pub fn publish(&self, geometry: Result<Solid>, options: PublishOptions) -> Result<SlotKey> {
        let key = self.claim_key(options.name.as_deref())?;
        self.queue.borrow_mut().cancel(&key);

        let (solid, failure) = match geometry {
            Ok(solid) => (Some(solid), None),
            Err(err) => (None, Some(as_build_failure(&key, err))),
        };

        let previous = self.slots.borrow_mut().remove(&key);
        let mut slot = match (previous, failure.clone()) {
            (Some(slot), _) => slot,
            (None, Some(err)) if options.param.is_none() => return Err(err),
            (None, _) => DisplaySlot {
                geometry: None,
                presentation: Presentation::default(),
                tree: None,
                subscription: None,
                build: None,
            },
        };

        options.apply(&mut slot.presentation);
        if solid.is_some() {
            slot.geometry = solid.clone();
        }
        slot.build = options.build.clone();

        let same_tree = match (&slot.tree, &options.param) {
            (Some(old), Some(new)) => old.ptr_eq(new) && !new.is_released(),
            _ => false,
        };
        if !same_tree {
            slot.subscription = None;
            slot.tree = options.param.clone();
            if let Some(tree) = &slot.tree {
                let queue = self.queue.clone();
                let target = key.clone();
                slot.subscription = Some(tree.on_change("", move |_| {
                    queue.borrow_mut().schedule(&target);
                })?);
            }
        }

        let presentation = slot.presentation.clone();
        self.slots.borrow_mut().insert(key.clone(), slot);
        match failure {
            Some(err) => Err(err),
            None => {
                if let Some(solid) = &solid {
                    self.viewport.show(&key, solid, &presentation);
                }
                Ok(key)
            }
        }
    }

    fn claim_key(&self, name: Option<&str>) -> Result<SlotKey> {
        let mut pass = self.pass.borrow_mut();
        let position = pass.as_mut().map(|p| {
            let index = p.next_index;
            p.next_index += 1;
            index
        });

        let key = match name {
            Some(name) if name.trim().is_empty() => {
                return Err(ParamError::invalid_identifier(name, "slot label must not be empty"));
            }
            Some(name) => SlotKey::Named(name.to_string()),
            None => match position {
                Some(index) => SlotKey::Index(index),
                None => {
                    return Err(ParamError::invalid_identifier(
                        "",
                        "an unlabelled slot can only be published during an evaluation pass",
                    ));
                }
            },
        };

        if let Some(pass) = pass.as_mut() {
            pass.published.insert(key.clone());
        }
        Ok(key)
    }

    /// Run the rebuilds scheduled so far, at most one per slot.
    ///
    /// Slots scheduled while this runs (a build that edits a parameter, a
    /// handler that sets another tree) stay queued for the next flush.
    pub fn flush(&self) -> FlushReport {
        let batch = self.queue.borrow_mut().take();
        self.rebuild(batch)
    }

    /// [`RebuildPipeline::flush`] limited to `keys`. Keys no longer pending
    /// are skipped; other pending slots stay queued.
    pub fn flush_only(&self, keys: &[SlotKey]) -> FlushReport {
        let batch = {
            let mut queue = self.queue.borrow_mut();
            let (batch, rest): (Vec<SlotKey>, Vec<SlotKey>) =
                queue.take().into_iter().partition(|k| keys.contains(k));
            queue.pending = rest;
            batch
        };
        self.rebuild(batch)
    }

    /// Remove scheduled slots that are bound to a tree but have no build
    /// closure from the queue and return them. Only a fresh evaluation pass
    /// can update those.
    pub fn take_stale(&self) -> Vec<SlotKey> {
        let stale: Vec<SlotKey> = {
            let slots = self.slots.borrow();
            self.queue
                .borrow()
                .pending
                .iter()
                .filter(|k| slots.get(*k).is_some_and(|s| s.build.is_none() && s.tree.is_some()))
                .cloned()
                .collect()
        };
        let mut queue = self.queue.borrow_mut();
        for key in &stale {
            queue.cancel(key);
        }
        stale
    }

    fn rebuild(&self, batch: Vec<SlotKey>) -> FlushReport {
        let mut report = FlushReport::default();

        for key in batch {
            let bound = {
                let slots = self.slots.borrow();
                slots.get(&key).map(|s| (s.build.clone(), s.tree.is_some()))
            };
            let Some((build, has_tree)) = bound else {
                continue;
            };

            let Some(build) = build else {
                if has_tree {
                    report.stale.push(key);
                }
                continue;
            };

            log::debug!("Rebuilding slot {key}");
            match build() {
                Ok(solid) => {
                    let presentation = {
                        let mut slots = self.slots.borrow_mut();
                        slots.get_mut(&key).map(|slot| {
                            slot.geometry = Some(solid.clone());
                            slot.presentation.clone()
                        })
                    };
                    // The build may have torn the slot down.
                    if let Some(presentation) = presentation {
                        self.viewport.show(&key, &solid, &presentation);
                        report.rebuilt.push(key);
                    }
                }
                Err(err) => {
                    let err = as_build_failure(&key, err);
                    self.diagnostics
                        .push(from_param_error(ScriptPhase::Rebuild, &err).with_slot(&key));
                    report.failed.push(key);
                }
            }
        }

        if !report.is_empty() {
            log::info!(
                "Flush: {} rebuilt, {} failed, {} stale",
                report.rebuilt.len(),
                report.failed.len(),
                report.stale.len()
            );
        }
        report
    }

    /// Slots waiting for the next flush.
    pub fn pending(&self) -> Vec<SlotKey> {
        self.queue.borrow().pending.clone()
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots.borrow().keys().cloned().collect()
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.slots.borrow().contains_key(key)
    }

    /// Last successfully built geometry of `key`.
    pub fn geometry(&self, key: &SlotKey) -> Option<Solid> {
        self.slots.borrow().get(key).and_then(|s| s.geometry.clone())
    }

    pub fn presentation(&self, key: &SlotKey) -> Option<Presentation> {
        self.slots.borrow().get(key).map(|s| s.presentation.clone())
    }

    /// True if `key` holds a live subscription to a tree.
    pub fn is_subscribed(&self, key: &SlotKey) -> bool {
        self.slots
            .borrow()
            .get(key)
            .and_then(|s| s.subscription.as_ref())
            .is_some_and(|sub| sub.is_active())
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every slot.
    pub fn clear(&self) {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        self.queue.borrow_mut().take();
        for key in slots.into_keys() {
            self.viewport.remove(&key);
        }
    }
}

fn as_build_failure(key: &SlotKey, err: ParamError) -> ParamError {
    match err {
        ParamError::BuildFailure { .. } => err,
        other => ParamError::build_failure(format!("slot {key}"), other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::geometry::{GeometryKernel, PreviewKernel};
    use crate::schema::ParamSpec;
    use crate::tree::ParamTree;
    use crate::value::ParamValue;
    use crate::viewport::SceneViewport;
    use serde_json::json;
    use std::cell::Cell;

    fn setup() -> (RebuildPipeline, SceneViewport, Diagnostics) {
        let viewport = SceneViewport::new();
        let diagnostics = Diagnostics::default();
        let pipeline = RebuildPipeline::new(Rc::new(viewport.clone()), diagnostics.clone());
        (pipeline, viewport, diagnostics)
    }

    fn box_tree() -> ParamTree {
        ParamTree::from_schema(
            "box",
            &[
                ParamSpec::leaf("Width", "float", json!(1.0)),
                ParamSpec::leaf("Depth", "float", json!(1.0)),
                ParamSpec::leaf("Height", "float", json!(1.0)),
            ],
        )
        .unwrap()
    }

    fn build_box(tree: &ParamTree) -> Result<Solid> {
        let k = PreviewKernel;
        let dim = |p: &str| tree.get(p).map(|v| v.as_f64().unwrap_or(0.0));
        Ok(k.cuboid(&k.workplane(), dim("Width")?, dim("Depth")?, dim("Height")?)?)
    }

    fn bound_options(tree: &ParamTree, runs: Rc<Cell<usize>>) -> PublishOptions {
        let t = tree.clone();
        PublishOptions::named("box").bind(tree, move || {
            runs.set(runs.get() + 1);
            build_box(&t)
        })
    }

    #[test]
    fn test_three_changes_in_one_turn_rebuild_once() {
        let (pipeline, viewport, _) = setup();
        let tree = box_tree();
        let runs = Rc::new(Cell::new(0));
        let key = pipeline
            .publish(build_box(&tree), bound_options(&tree, runs.clone()))
            .unwrap();

        tree.set("Width", ParamValue::Float(2.0)).unwrap();
        tree.set("Depth", ParamValue::Float(3.0)).unwrap();
        tree.set("Height", ParamValue::Float(4.0)).unwrap();
        assert_eq!(runs.get(), 0);

        let report = pipeline.flush();
        assert_eq!(report.rebuilt, vec![key.clone()]);
        assert_eq!(runs.get(), 1);

        let size = pipeline.geometry(&key).unwrap().bounds().unwrap().size();
        assert_eq!(size.to_array(), [2.0, 3.0, 4.0]);
        assert_eq!(viewport.show_count(&key), 2);
        assert!(pipeline.flush().is_empty());
    }

    #[test]
    fn test_failed_rebuild_keeps_geometry_and_reports_once() {
        let (pipeline, viewport, diagnostics) = setup();
        let tree = box_tree();
        let t = tree.clone();
        let key = pipeline
            .publish(
                build_box(&tree),
                PublishOptions::named("box").bind(&tree, move || build_box(&t)),
            )
            .unwrap();
        let before = pipeline.geometry(&key).unwrap();

        tree.set("Width", ParamValue::Float(0.0)).unwrap();
        tree.set("Height", ParamValue::Float(-1.0)).unwrap();
        let report = pipeline.flush();

        assert_eq!(report.failed, vec![key.clone()]);
        assert_eq!(pipeline.geometry(&key).unwrap(), before);
        assert_eq!(viewport.show_count(&key), 1);

        let diags = diagnostics.take();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].error, Some(ErrorKind::BuildFailure));
        assert_eq!(diags[0].slot.as_deref(), Some("box"));
    }

    #[test]
    fn test_orphan_sweep() {
        let (pipeline, viewport, _) = setup();
        let tree = box_tree();
        let k = PreviewKernel;
        let solid = k.sphere(&k.workplane(), 1.0).unwrap();

        pipeline.begin_pass();
        pipeline.publish(Ok(solid.clone()), PublishOptions::named("A")).unwrap();
        let b = pipeline
            .publish(Ok(solid.clone()), PublishOptions::named("B").watch(&tree))
            .unwrap();
        assert!(pipeline.end_pass().is_empty());
        assert!(pipeline.is_subscribed(&b));
        assert_eq!(tree.subscriber_count(), 1);

        pipeline.begin_pass();
        pipeline.publish(Ok(solid), PublishOptions::named("A")).unwrap();
        assert_eq!(pipeline.end_pass(), vec![b.clone()]);

        assert!(!viewport.contains(&b));
        assert!(!pipeline.contains(&b));
        assert_eq!(tree.subscriber_count(), 0);
    }

    #[test]
    fn test_aborted_pass_sweeps_nothing() {
        let (pipeline, viewport, _) = setup();
        let solid = PreviewKernel.sphere(&Solid::empty(), 1.0).unwrap();
        pipeline.begin_pass();
        pipeline.publish(Ok(solid), PublishOptions::default()).unwrap();
        pipeline.end_pass();

        pipeline.begin_pass();
        pipeline.abort_pass();
        assert_eq!(viewport.len(), 1);
    }

    #[test]
    fn test_presentation_persists_across_publishes() {
        let (pipeline, viewport, _) = setup();
        let solid = PreviewKernel.sphere(&Solid::empty(), 1.0).unwrap();
        let red = [1.0, 0.0, 0.0, 1.0];
        let key = pipeline
            .publish(Ok(solid.clone()), PublishOptions::named("s").color(red).visible(false))
            .unwrap();
        let id = viewport.get(&key).unwrap().id;

        pipeline.publish(Ok(solid), PublishOptions::named("s")).unwrap();
        let p = pipeline.presentation(&key).unwrap();
        assert_eq!(p.color, red);
        assert!(!p.visible);
        assert_eq!(viewport.get(&key).unwrap().id, id);
    }

    #[test]
    fn test_positional_keys_follow_call_order() {
        let (pipeline, _, _) = setup();
        let solid = PreviewKernel.sphere(&Solid::empty(), 1.0).unwrap();

        assert!(matches!(
            pipeline.publish(Ok(solid.clone()), PublishOptions::default()),
            Err(ParamError::InvalidIdentifier { .. })
        ));

        pipeline.begin_pass();
        let a = pipeline.publish(Ok(solid.clone()), PublishOptions::default()).unwrap();
        pipeline.publish(Ok(solid.clone()), PublishOptions::named("named")).unwrap();
        let c = pipeline.publish(Ok(solid.clone()), PublishOptions::default()).unwrap();
        assert_eq!(a, SlotKey::Index(0));
        assert_eq!(c, SlotKey::Index(2));
        assert!(pipeline.publish(Ok(solid), PublishOptions::named("  ")).is_err());
        pipeline.end_pass();
    }

    #[test]
    fn test_initial_failure_leaves_slot_unpopulated() {
        let (pipeline, viewport, _) = setup();
        let err = pipeline
            .publish(Err(ParamError::not_found("Width")), PublishOptions::named("box"))
            .unwrap_err();
        assert!(matches!(err, ParamError::BuildFailure { .. }));
        assert!(pipeline.is_empty());
        assert!(viewport.is_empty());
    }

    #[test]
    fn test_bound_slot_recovers_from_initial_failure() {
        let (pipeline, viewport, _) = setup();
        let tree = box_tree();
        tree.set("Width", ParamValue::Float(0.0)).unwrap();
        let runs = Rc::new(Cell::new(0));

        let err = pipeline
            .publish(build_box(&tree), bound_options(&tree, runs.clone()))
            .unwrap_err();
        assert!(matches!(err, ParamError::BuildFailure { .. }));
        let key = SlotKey::Named("box".into());
        assert!(pipeline.contains(&key));
        assert!(pipeline.geometry(&key).is_none());
        assert!(viewport.is_empty());

        tree.set("Width", ParamValue::Float(2.0)).unwrap();
        let report = pipeline.flush();
        assert_eq!(report.rebuilt, vec![key.clone()]);
        assert_eq!(runs.get(), 1);
        assert_eq!(viewport.show_count(&key), 1);
    }

    #[test]
    fn test_take_stale_leaves_built_slots_queued() {
        let (pipeline, _, _) = setup();
        let tree = box_tree();
        let runs = Rc::new(Cell::new(0));
        let built = pipeline
            .publish(build_box(&tree), bound_options(&tree, runs.clone()))
            .unwrap();
        let watched = pipeline
            .publish(build_box(&tree), PublishOptions::named("watched").watch(&tree))
            .unwrap();

        tree.set("Width", ParamValue::Float(2.0)).unwrap();
        assert_eq!(pipeline.take_stale(), vec![watched]);
        assert_eq!(pipeline.pending(), vec![built.clone()]);

        assert!(pipeline.flush_only(&[]).is_empty());
        assert_eq!(pipeline.pending(), vec![built.clone()]);
        assert_eq!(pipeline.flush_only(&[built]).rebuilt.len(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_republish_cancels_scheduled_rebuild() {
        let (pipeline, _, _) = setup();
        let tree = box_tree();
        let runs = Rc::new(Cell::new(0));
        pipeline
            .publish(build_box(&tree), bound_options(&tree, runs.clone()))
            .unwrap();

        tree.set("Width", ParamValue::Float(5.0)).unwrap();
        assert_eq!(pipeline.pending().len(), 1);
        pipeline
            .publish(build_box(&tree), bound_options(&tree, runs.clone()))
            .unwrap();

        assert!(pipeline.pending().is_empty());
        assert!(pipeline.flush().is_empty());
        assert_eq!(runs.get(), 0);
        // Same tree: the subscription was kept rather than duplicated.
        assert_eq!(tree.subscriber_count(), 1);
    }

    #[test]
    fn test_rescheduled_during_flush_waits_for_next_turn() {
        let (pipeline, _, _) = setup();
        let tree = box_tree();
        let runs = Rc::new(Cell::new(0));
        let t = tree.clone();
        let r = runs.clone();
        pipeline
            .publish(
                build_box(&tree),
                PublishOptions::named("box").bind(&tree, move || {
                    r.set(r.get() + 1);
                    if r.get() == 1 {
                        t.set("Depth", ParamValue::Float(9.0))?;
                    }
                    build_box(&t)
                }),
            )
            .unwrap();

        tree.set("Width", ParamValue::Float(2.0)).unwrap();
        assert_eq!(pipeline.flush().rebuilt.len(), 1);
        assert_eq!(runs.get(), 1);
        assert_eq!(pipeline.pending().len(), 1);

        pipeline.flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_watched_slot_reports_stale() {
        let (pipeline, _, _) = setup();
        let tree = box_tree();
        let key = pipeline
            .publish(build_box(&tree), PublishOptions::named("box").watch(&tree))
            .unwrap();
        tree.set("Width", ParamValue::Float(2.0)).unwrap();
        assert_eq!(pipeline.flush().stale, vec![key]);
    }
}
