//! Parameter trees.
//!
//! A [`ParamTree`] is a cheap, clonable handle to a typed hierarchy of
//! parameters built from a declarative schema. Leaves hold values, groups
//! hold ordered children and optionally a [`ConditionalPolicy`]. All reads
//! and writes go through dotted/indexed paths relative to the root:
//!
//! - `"Width"` - direct child named `Width`
//! - `"Body.Height"` - nested child
//! - `"[1]"`, `"Body[0]"` - positional access
//!
//! The tree is single-threaded (`Rc` + `RefCell`). No borrow is held while
//! change handlers run.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;

use crate::change::{ChangeBus, ChangeEvent, ChangeHandler, ChangeKind, Subscription};
use crate::error::{ParamError, Result};
use crate::policy::ConditionalPolicy;
use crate::schema::{ParamSpec, SpecKind};
use crate::value::{self, Constraints, ParamValue, ValueType};

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf {
        ty: ValueType,
        value: ParamValue,
        constraints: Constraints,
    },
    Group {
        children: Vec<NodeId>,
        policy: Option<ConditionalPolicy>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    /// Canonical path (names joined by `.`), empty for the root.
    path: String,
    parent: Option<NodeId>,
    visible: bool,
    kind: NodeKind,
}

struct TreeInner {
    name: String,
    nodes: RefCell<Vec<Node>>,
    bus: Rc<ChangeBus>,
    released: Cell<bool>,
}

/// Shared handle to a parameter tree. Clones refer to the same tree.
#[derive(Clone)]
pub struct ParamTree {
    inner: Rc<TreeInner>,
}

/// Serializable snapshot of a node, the contract handed to editor widgets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutline {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ParamValue>,
    #[serde(skip_serializing_if = "is_unconstrained")]
    pub constraints: Constraints,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeOutline>,
}

fn is_unconstrained(c: &Constraints) -> bool {
    *c == Constraints::default()
}

impl ParamTree {
    /// Build a tree whose root group is named `root` and has `children`.
    pub fn from_schema(root: &str, children: &[ParamSpec]) -> Result<Self> {
        Self::from_group(&ParamSpec::group(root, children.to_vec()))
    }

    /// Build a tree from a group descriptor; its `name` becomes the root name
    /// and its `policy` (if any) attaches to the root group.
    pub fn from_group(root: &ParamSpec) -> Result<Self> {
        if root.name.trim().is_empty() {
            return Err(ParamError::invalid_identifier(&root.name, "root name must not be empty"));
        }
        if let Some(ty) = root.ty.as_deref() {
            if !ty.eq_ignore_ascii_case("group") {
                return Err(ParamError::constraint(&root.name, "a tree root must be a group"));
            }
        }

        let mut nodes = vec![Node {
            name: root.name.clone(),
            path: String::new(),
            parent: None,
            visible: root.visible.unwrap_or(true),
            kind: NodeKind::Group {
                children: Vec::new(),
                policy: None,
            },
        }];
        insert_children(&mut nodes, ROOT, &root.children)?;
        attach_policy(&mut nodes, ROOT, root)?;

        Ok(Self {
            inner: Rc::new(TreeInner {
                name: root.name.clone(),
                nodes: RefCell::new(nodes),
                bus: ChangeBus::new(),
                released: Cell::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True when both handles refer to the same tree instance.
    pub fn ptr_eq(&self, other: &ParamTree) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current value of the leaf at `path`.
    pub fn get(&self, path: &str) -> Result<ParamValue> {
        let nodes = self.inner.nodes.borrow();
        let id = resolve(&nodes, path)?;
        match &nodes[id].kind {
            NodeKind::Leaf { value, .. } => Ok(value.clone()),
            NodeKind::Group { .. } => Err(ParamError::not_found(path)),
        }
    }

    /// Declared type of the leaf at `path`.
    pub fn value_type(&self, path: &str) -> Result<ValueType> {
        let nodes = self.inner.nodes.borrow();
        let id = resolve(&nodes, path)?;
        match &nodes[id].kind {
            NodeKind::Leaf { ty, .. } => Ok(*ty),
            NodeKind::Group { .. } => Err(ParamError::not_found(path)),
        }
    }

    pub fn is_visible(&self, path: &str) -> Result<bool> {
        let nodes = self.inner.nodes.borrow();
        let id = resolve(&nodes, path)?;
        Ok(nodes[id].visible)
    }

    /// Names of the direct children of the group at `path`.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        let nodes = self.inner.nodes.borrow();
        let id = resolve(&nodes, path)?;
        match &nodes[id].kind {
            NodeKind::Group { children, .. } => {
                Ok(children.iter().map(|c| nodes[*c].name.clone()).collect())
            }
            NodeKind::Leaf { .. } => Err(ParamError::not_found(path)),
        }
    }

    /// Every leaf as `(canonical path, value)`, in declaration order.
    pub fn values(&self) -> Vec<(String, ParamValue)> {
        let nodes = self.inner.nodes.borrow();
        let mut out = Vec::new();
        collect_leaves(&nodes, ROOT, &mut out);
        out
    }

    /// Validate and store a new value, then notify listeners.
    ///
    /// Exactly one value event is emitted per successful call, before this
    /// returns. If the leaf is the discriminator of a conditional group, the
    /// group's visibility is recomputed right after and one visibility event
    /// is emitted per child that actually flipped.
    pub fn set(&self, path: &str, new: ParamValue) -> Result<()> {
        let (event, policy_group) = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let id = resolve(&nodes, path)?;
            let canonical = nodes[id].path.clone();
            let parent = nodes[id].parent;

            let NodeKind::Leaf { ty, value, constraints } = &mut nodes[id].kind else {
                return Err(ParamError::not_found(path));
            };
            let checked = value::check(*ty, constraints, new)
                .map_err(|reason| ParamError::constraint(&canonical, reason))?;
            let old = std::mem::replace(value, checked.clone());

            let leaf_name = nodes[id].name.clone();
            let policy_group = parent.filter(|p| match &nodes[*p].kind {
                NodeKind::Group { policy: Some(policy), .. } => policy.discriminator() == leaf_name,
                _ => false,
            });

            let event = ChangeEvent::new(&self.inner.name, &canonical, ChangeKind::Value, old, checked);
            (event, policy_group)
        };

        self.inner.bus.emit(&event);

        if let Some(group) = policy_group {
            self.apply_policy(group);
        }
        Ok(())
    }

    fn apply_policy(&self, group: NodeId) {
        let flipped = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let changes = policy_changes(&nodes, group);
            let mut flipped = Vec::new();
            for (child, visible) in changes {
                if nodes[child].visible != visible {
                    nodes[child].visible = visible;
                    flipped.push((nodes[child].path.clone(), visible));
                }
            }
            flipped
        };

        for (path, visible) in flipped {
            let event = ChangeEvent::new(
                &self.inner.name,
                &path,
                ChangeKind::Visibility,
                ParamValue::Bool(!visible),
                ParamValue::Bool(visible),
            );
            self.inner.bus.emit(&event);
        }
    }

    /// Subscribe to changes of the node at `path` and its descendants. An
    /// empty path subscribes to the whole tree.
    pub fn on_change(&self, path: &str, handler: impl Fn(&ChangeEvent) + 'static) -> Result<Subscription> {
        let scope = {
            let nodes = self.inner.nodes.borrow();
            let id = resolve(&nodes, path)?;
            nodes[id].path.clone()
        };
        let handler: ChangeHandler = Rc::new(handler);
        Ok(self.inner.bus.subscribe(&scope, handler))
    }

    /// Number of live listeners on this tree.
    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.len()
    }

    /// Drop every listener. Called when the registry evicts the tree.
    pub fn release(&self) {
        self.inner.released.set(true);
        self.inner.bus.clear();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.get()
    }

    pub fn outline(&self) -> NodeOutline {
        let nodes = self.inner.nodes.borrow();
        outline_node(&nodes, ROOT)
    }
}

impl std::fmt::Debug for ParamTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamTree")
            .field("name", &self.inner.name)
            .field("values", &self.values())
            .finish()
    }
}

fn insert_children(nodes: &mut Vec<Node>, parent: NodeId, specs: &[ParamSpec]) -> Result<()> {
    for spec in specs {
        let parent_path = nodes[parent].path.clone();
        validate_name(&spec.name, &parent_path)?;

        let siblings = match &nodes[parent].kind {
            NodeKind::Group { children, .. } => children.clone(),
            NodeKind::Leaf { .. } => Vec::new(),
        };
        if siblings.iter().any(|s| nodes[*s].name == spec.name) {
            return Err(ParamError::invalid_identifier(
                &spec.name,
                format!("duplicate sibling under {:?}", nodes[parent].name),
            ));
        }

        let path = join(&parent_path, &spec.name);
        let kind = match spec.kind(&path)? {
            SpecKind::Group => NodeKind::Group {
                children: Vec::new(),
                policy: None,
            },
            SpecKind::Leaf(ty) => {
                if !spec.children.is_empty() {
                    return Err(ParamError::constraint(&path, "a leaf parameter cannot have children"));
                }
                let constraints = spec.constraints();
                let declared = match &spec.value {
                    Some(raw) => value::coerce(ty, raw),
                    None => value::default_for(ty, &constraints)
                        .ok_or_else(|| format!("{ty} parameter needs a value")),
                };
                let value = declared
                    .and_then(|v| value::check(ty, &constraints, v))
                    .map_err(|reason| ParamError::constraint(&path, reason))?;
                NodeKind::Leaf { ty, value, constraints }
            }
        };

        let id = nodes.len();
        let is_group = matches!(kind, NodeKind::Group { .. });
        nodes.push(Node {
            name: spec.name.clone(),
            path,
            parent: Some(parent),
            visible: spec.visible.unwrap_or(true),
            kind,
        });
        if let NodeKind::Group { children, .. } = &mut nodes[parent].kind {
            children.push(id);
        }

        if is_group {
            insert_children(nodes, id, &spec.children)?;
            attach_policy(nodes, id, spec)?;
        }
    }
    Ok(())
}

fn attach_policy(nodes: &mut [Node], group: NodeId, spec: &ParamSpec) -> Result<()> {
    let Some(policy_spec) = &spec.policy else {
        return Ok(());
    };

    let policy = {
        let NodeKind::Group { children, .. } = &nodes[group].kind else {
            return Ok(());
        };
        let names: Vec<&str> = children.iter().map(|c| nodes[*c].name.as_str()).collect();
        ConditionalPolicy::new(policy_spec, &nodes[group].path, &names)?
    };

    if let NodeKind::Group { policy: slot, .. } = &mut nodes[group].kind {
        *slot = Some(policy);
    }

    // Initial visibility; nobody can be listening yet.
    for (child, visible) in policy_changes(nodes, group) {
        nodes[child].visible = visible;
    }
    Ok(())
}

/// Target visibility of each non-discriminator child of a policy group.
fn policy_changes(nodes: &[Node], group: NodeId) -> Vec<(NodeId, bool)> {
    let NodeKind::Group { children, policy: Some(policy) } = &nodes[group].kind else {
        return Vec::new();
    };
    let Some(disc) = children
        .iter()
        .find(|c| nodes[**c].name == policy.discriminator())
    else {
        return Vec::new();
    };
    let NodeKind::Leaf { value, .. } = &nodes[*disc].kind else {
        return Vec::new();
    };

    let names = children.iter().map(|c| nodes[*c].name.as_str());
    let shown = policy.visibility(value, names);
    shown
        .into_iter()
        .filter_map(|(name, visible)| {
            children
                .iter()
                .find(|c| nodes[**c].name == name)
                .map(|c| (*c, visible))
        })
        .collect()
}

fn validate_name(name: &str, parent_path: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ParamError::invalid_identifier(
            name,
            format!("empty parameter name under {parent_path:?}"),
        ));
    }
    if name.contains(['.', '[', ']']) {
        return Err(ParamError::invalid_identifier(
            name,
            "parameter names cannot contain '.', '[' or ']'",
        ));
    }
    Ok(())
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Resolve a dotted/indexed path to a node.
fn resolve(nodes: &[Node], path: &str) -> Result<NodeId> {
    let not_found = || ParamError::not_found(path);
    let mut current = ROOT;
    if path.is_empty() {
        return Ok(current);
    }

    for segment in path.split('.') {
        let (name, indices) = split_segment(segment).ok_or_else(not_found)?;
        let NodeKind::Group { children, .. } = &nodes[current].kind else {
            return Err(not_found());
        };

        if !name.is_empty() {
            current = *children
                .iter()
                .find(|c| nodes[**c].name == name)
                .ok_or_else(not_found)?;
        }
        for index in indices {
            let NodeKind::Group { children, .. } = &nodes[current].kind else {
                return Err(not_found());
            };
            current = *children.get(index).ok_or_else(not_found)?;
        }
    }
    Ok(current)
}

/// Split `"Body[1][0]"` into `("Body", [1, 0])`.
fn split_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let (name, mut rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };
    if name.is_empty() && rest.is_empty() {
        return None;
    }

    let mut indices = Vec::new();
    while !rest.is_empty() {
        let close = rest.find(']')?;
        if !rest.starts_with('[') {
            return None;
        }
        indices.push(rest[1..close].trim().parse().ok()?);
        rest = &rest[close + 1..];
    }
    Some((name, indices))
}

fn collect_leaves(nodes: &[Node], id: NodeId, out: &mut Vec<(String, ParamValue)>) {
    match &nodes[id].kind {
        NodeKind::Leaf { value, .. } => out.push((nodes[id].path.clone(), value.clone())),
        NodeKind::Group { children, .. } => {
            for child in children {
                collect_leaves(nodes, *child, out);
            }
        }
    }
}

fn outline_node(nodes: &[Node], id: NodeId) -> NodeOutline {
    let node = &nodes[id];
    match &node.kind {
        NodeKind::Leaf { ty, value, constraints } => NodeOutline {
            name: node.name.clone(),
            path: node.path.clone(),
            ty: ty.to_string(),
            value: Some(value.clone()),
            constraints: constraints.clone(),
            visible: node.visible,
            discriminator: None,
            children: Vec::new(),
        },
        NodeKind::Group { children, policy } => NodeOutline {
            name: node.name.clone(),
            path: node.path.clone(),
            ty: "group".to_string(),
            value: None,
            constraints: Constraints::default(),
            visible: node.visible,
            discriminator: policy.as_ref().map(|p| p.discriminator().to_string()),
            children: children.iter().map(|c| outline_node(nodes, *c)).collect(),
        },
    }
}
