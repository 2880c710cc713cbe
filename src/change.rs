//! Change notification for parameter trees.
//!
//! Every tree owns a [`ChangeBus`]. Listeners subscribe with a scope (a
//! canonical node path, empty for the whole tree) and receive each event
//! whose source lies inside that scope. Delivery is synchronous and no
//! borrow is held while a handler runs, so handlers may read or mutate the
//! tree, subscribe, or cancel subscriptions.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::value::ParamValue;

/// What changed on the source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Leaf value mutation.
    Value,
    /// Visibility toggled by a conditional policy. `old`/`new` are booleans.
    Visibility,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// Root name of the tree the source belongs to.
    pub root: String,
    /// Canonical path of the source node, relative to the root.
    pub source: String,
    pub kind: ChangeKind,
    pub old: ParamValue,
    pub new: ParamValue,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(root: &str, source: &str, kind: ChangeKind, old: ParamValue, new: ParamValue) -> Self {
        Self {
            root: root.to_string(),
            source: source.to_string(),
            kind,
            old,
            new,
            timestamp: Utc::now(),
        }
    }
}

pub type ChangeHandler = Rc<dyn Fn(&ChangeEvent)>;

struct Listener {
    id: u64,
    scope: String,
    handler: ChangeHandler,
}

#[derive(Default)]
pub struct ChangeBus {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
}

impl ChangeBus {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn subscribe(self: &Rc<Self>, scope: &str, handler: ChangeHandler) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            scope: scope.to_string(),
            handler,
        });
        Subscription {
            bus: Rc::downgrade(self),
            id,
        }
    }

    /// Deliver `event` to every listener whose scope contains its source.
    pub fn emit(&self, event: &ChangeEvent) {
        let targets: Vec<(u64, ChangeHandler)> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| in_scope(&l.scope, &event.source))
            .map(|l| (l.id, l.handler.clone()))
            .collect();

        for (id, handler) in targets {
            // An earlier handler may have cancelled this one.
            if self.is_live(id) {
                handler(event);
            }
        }
    }

    fn is_live(&self, id: u64) -> bool {
        self.listeners.borrow().iter().any(|l| l.id == id)
    }

    fn remove(&self, id: u64) {
        self.listeners.borrow_mut().retain(|l| l.id != id);
    }

    /// Drop every listener. Outstanding [`Subscription`]s become inert.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.listeners.borrow_mut());
        drop(drained);
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn in_scope(scope: &str, source: &str) -> bool {
    scope.is_empty()
        || source == scope
        || (source.len() > scope.len() && source.starts_with(scope) && source.as_bytes()[scope.len()] == b'.')
}

/// Handle to a listener. Dropping it (or calling [`Subscription::cancel`])
/// unsubscribes.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    bus: Weak<ChangeBus>,
    id: u64,
}

impl Subscription {
    pub fn cancel(self) {}

    /// False once cancelled through the bus (tree released) or dropped.
    pub fn is_active(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| bus.is_live(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str) -> ChangeEvent {
        ChangeEvent::new("t", source, ChangeKind::Value, ParamValue::Int(0), ParamValue::Int(1))
    }

    #[test]
    fn test_scope_matching() {
        assert!(in_scope("", "Width"));
        assert!(in_scope("Body", "Body"));
        assert!(in_scope("Body", "Body.Height"));
        assert!(!in_scope("Body", "Bodywork"));
        assert!(!in_scope("Body.Height", "Body"));
    }

    #[test]
    fn test_drop_cancels() {
        let bus = ChangeBus::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = bus.subscribe("", Rc::new(move |_| h.set(h.get() + 1)));

        bus.emit(&event("A"));
        assert!(sub.is_active());
        drop(sub);
        bus.emit(&event("A"));

        assert_eq!(hits.get(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_handler_can_cancel_later_listener() {
        let bus = ChangeBus::new();
        let hits = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let v = victim.clone();
        let _first = bus.subscribe("", Rc::new(move |_| {
            v.borrow_mut().take();
        }));
        let h = hits.clone();
        *victim.borrow_mut() = Some(bus.subscribe("", Rc::new(move |_| h.set(h.get() + 1))));

        bus.emit(&event("A"));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_clear_makes_subscriptions_inert() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe("", Rc::new(|_| {}));
        bus.clear();
        assert!(!sub.is_active());
    }
}
