//! Display slots: stable viewport identities for build outputs.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::change::Subscription;
use crate::error::Result;
use crate::geometry::Solid;
use crate::tree::ParamTree;

/// Identity of a display slot: the label given at publish time, or else the
/// position of the publish call within its evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    Named(String),
    Index(usize),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Named(name) => f.write_str(name),
            SlotKey::Index(i) => write!(f, "#{i}"),
        }
    }
}

impl Serialize for SlotKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub const DEFAULT_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

/// How a slot is drawn. Survives rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presentation {
    pub color: [f32; 4],
    pub label: Option<String>,
    pub visible: bool,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR,
            label: None,
            visible: true,
        }
    }
}

/// Re-runs a slot's build with the current parameter values.
pub type BuildFn = Rc<dyn Fn() -> Result<Solid>>;

/// Options for [`crate::pipeline::RebuildPipeline::publish`]. Presentation
/// fields left as `None` keep the slot's current setting.
#[derive(Clone, Default)]
pub struct PublishOptions {
    /// Slot label; positional when absent.
    pub name: Option<String>,
    pub color: Option<[f32; 4]>,
    pub visible: Option<bool>,
    /// Tree whose changes trigger a rebuild of this slot.
    pub param: Option<ParamTree>,
    pub build: Option<BuildFn>,
}

impl PublishOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn color(mut self, rgba: [f32; 4]) -> Self {
        self.color = Some(rgba);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    /// Bind `tree` and rebuild with `build` whenever it changes.
    pub fn bind(mut self, tree: &ParamTree, build: impl Fn() -> Result<Solid> + 'static) -> Self {
        self.param = Some(tree.clone());
        self.build = Some(Rc::new(build));
        self
    }

    /// Bind `tree` without a build closure; changes mark the slot stale.
    pub fn watch(mut self, tree: &ParamTree) -> Self {
        self.param = Some(tree.clone());
        self
    }

    pub(crate) fn apply(&self, presentation: &mut Presentation) {
        if let Some(color) = self.color {
            presentation.color = color;
        }
        if let Some(visible) = self.visible {
            presentation.visible = visible;
        }
        if let Some(name) = &self.name {
            presentation.label = Some(name.clone());
        }
    }
}

impl fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishOptions")
            .field("name", &self.name)
            .field("color", &self.color)
            .field("visible", &self.visible)
            .field("param", &self.param.as_ref().map(|t| t.name().to_string()))
            .field("build", &self.build.is_some())
            .finish()
    }
}

/// A slot. `geometry` is `None` until a build succeeds.
pub(crate) struct DisplaySlot {
    pub geometry: Option<Solid>,
    pub presentation: Presentation,
    pub tree: Option<ParamTree>,
    pub subscription: Option<Subscription>,
    pub build: Option<BuildFn>,
}
