//! Geometry kernel seam.
//!
//! The core never looks inside geometry: build functions produce [`Solid`]
//! handles through a [`GeometryKernel`] and the pipeline passes them on to
//! the viewport. [`PreviewKernel`] is the kernel shipped with the crate; it
//! records placed primitives and their axis-aligned bounds, which is all the
//! scene summary and the tests need. A B-rep kernel plugs in behind the same
//! trait.

use std::rc::Rc;

use glam::DVec3;
use serde::Serialize;

use crate::error::KernelError;

/// Text extrusion request. Font metrics are approximated by the preview
/// kernel; a real kernel resolves `font` itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSpec {
    pub text: String,
    /// Glyph size.
    pub size: f64,
    /// Extrusion distance.
    pub height: f64,
    pub font: String,
    /// `regular`, `bold` or `italic`.
    pub kind: String,
    /// `left`, `center` or `right`.
    pub halign: String,
    /// `top`, `center` or `bottom`.
    pub valign: String,
}

impl TextSpec {
    pub fn new(text: impl Into<String>, size: f64, height: f64) -> Self {
        Self {
            text: text.into(),
            size,
            height,
            font: "Arial".to_string(),
            kind: "regular".to_string(),
            halign: "center".to_string(),
            valign: "center".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    Box { width: f64, depth: f64, height: f64 },
    Sphere { radius: f64 },
    Text(TextSpec),
}

/// A primitive placed at an offset from the world origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placed {
    pub primitive: Primitive,
    pub offset: DVec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Immutable geometry handle. Cloning shares the parts.
///
/// A solid doubles as a workplane: `origin` is where the next primitive is
/// placed, moved by [`GeometryKernel::center`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Solid {
    origin: DVec3,
    parts: Rc<Vec<Placed>>,
}

impl Solid {
    pub fn empty() -> Self {
        Self {
            origin: DVec3::ZERO,
            parts: Rc::new(Vec::new()),
        }
    }

    pub fn parts(&self) -> &[Placed] {
        &self.parts
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.parts
            .iter()
            .map(|p| primitive_bounds(&p.primitive).translated(p.offset))
            .reduce(Bounds::union)
    }

    fn with_part(&self, primitive: Primitive) -> Solid {
        let mut parts = (*self.parts).clone();
        parts.push(Placed {
            primitive,
            offset: self.origin,
        });
        Solid {
            origin: self.origin,
            parts: Rc::new(parts),
        }
    }
}

impl Bounds {
    fn translated(self, by: DVec3) -> Bounds {
        Bounds {
            min: self.min + by,
            max: self.max + by,
        }
    }
}

/// Capability interface to the solid modeller.
pub trait GeometryKernel {
    /// Empty workplane at the world origin.
    fn workplane(&self) -> Solid {
        Solid::empty()
    }

    /// Box centred on the workplane origin.
    fn cuboid(&self, on: &Solid, width: f64, depth: f64, height: f64) -> Result<Solid, KernelError>;

    /// Sphere centred on the workplane origin.
    fn sphere(&self, on: &Solid, radius: f64) -> Result<Solid, KernelError>;

    /// Extruded text anchored at the workplane origin.
    fn text(&self, on: &Solid, spec: &TextSpec) -> Result<Solid, KernelError>;

    /// Move the solid and its workplane.
    fn translate(&self, solid: &Solid, by: DVec3) -> Solid;

    /// Shift the workplane origin in its own XY plane.
    fn center(&self, solid: &Solid, x: f64, y: f64) -> Solid;
}

/// Preview kernel: primitives plus bounds, no boundary representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewKernel;

/// Average advance of a glyph relative to its size.
const GLYPH_ADVANCE: f64 = 0.6;

fn positive(op: &'static str, what: &'static str, value: f64) -> Result<f64, KernelError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(KernelError::NonPositive { op, what, value })
    }
}

fn one_of(op: &'static str, what: &str, value: &str, allowed: &[&str]) -> Result<(), KernelError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(KernelError::Unsupported {
            op,
            reason: format!("{what} {value:?} is not one of {allowed:?}"),
        })
    }
}

impl GeometryKernel for PreviewKernel {
    fn cuboid(&self, on: &Solid, width: f64, depth: f64, height: f64) -> Result<Solid, KernelError> {
        let primitive = Primitive::Box {
            width: positive("box", "width", width)?,
            depth: positive("box", "depth", depth)?,
            height: positive("box", "height", height)?,
        };
        Ok(on.with_part(primitive))
    }

    fn sphere(&self, on: &Solid, radius: f64) -> Result<Solid, KernelError> {
        let radius = positive("sphere", "radius", radius)?;
        Ok(on.with_part(Primitive::Sphere { radius }))
    }

    fn text(&self, on: &Solid, spec: &TextSpec) -> Result<Solid, KernelError> {
        positive("text", "size", spec.size)?;
        positive("text", "height", spec.height)?;
        if spec.text.is_empty() {
            return Err(KernelError::Unsupported {
                op: "text",
                reason: "text must not be empty".to_string(),
            });
        }
        one_of("text", "kind", &spec.kind, &["regular", "bold", "italic"])?;
        one_of("text", "halign", &spec.halign, &["left", "center", "right"])?;
        one_of("text", "valign", &spec.valign, &["top", "center", "bottom"])?;
        Ok(on.with_part(Primitive::Text(spec.clone())))
    }

    fn translate(&self, solid: &Solid, by: DVec3) -> Solid {
        let parts = solid
            .parts
            .iter()
            .map(|p| Placed {
                primitive: p.primitive.clone(),
                offset: p.offset + by,
            })
            .collect();
        Solid {
            origin: solid.origin + by,
            parts: Rc::new(parts),
        }
    }

    fn center(&self, solid: &Solid, x: f64, y: f64) -> Solid {
        Solid {
            origin: solid.origin + DVec3::new(x, y, 0.0),
            parts: solid.parts.clone(),
        }
    }
}

fn primitive_bounds(primitive: &Primitive) -> Bounds {
    match primitive {
        Primitive::Box { width, depth, height } => {
            let half = DVec3::new(*width, *depth, *height) * 0.5;
            Bounds { min: -half, max: half }
        }
        Primitive::Sphere { radius } => Bounds {
            min: DVec3::splat(-radius),
            max: DVec3::splat(*radius),
        },
        Primitive::Text(spec) => {
            let width = spec.text.chars().count() as f64 * spec.size * GLYPH_ADVANCE;
            let (x0, x1) = match spec.halign.as_str() {
                "left" => (0.0, width),
                "right" => (-width, 0.0),
                _ => (-width / 2.0, width / 2.0),
            };
            let (y0, y1) = match spec.valign.as_str() {
                "bottom" => (0.0, spec.size),
                "top" => (-spec.size, 0.0),
                _ => (-spec.size / 2.0, spec.size / 2.0),
            };
            Bounds {
                min: DVec3::new(x0, y0, 0.0),
                max: DVec3::new(x1, y1, spec.height),
            }
        }
    }
}
