//! Rhai integration for the geometry kernel.
//!
//! # Example (Rhai)
//! ```rhai
//! let part = workplane().center(2, 0).sphere(0.5);
//! let label = workplane().text("Hi", 2.0, 1.0, #{ halign: "left" });
//! let moved = part.translate(4, 0, 0);
//! ```
//!
//! Numbers may be written as integers or floats. Kernel rejections surface
//! as build failures.

use std::rc::Rc;

use glam::DVec3;
use rhai::{Dynamic, Engine, EvalAltResult, Map};

use crate::error::ParamError;
use crate::geometry::{GeometryKernel, Solid, TextSpec};
use crate::param_rhai::script_error;
use crate::script_log::stringify_dynamic;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Accept INT or FLOAT script values as f64.
fn number(op: &str, what: &str, value: &Dynamic) -> ScriptResult<f64> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f64);
    }
    Err(format!("{op}: {what} must be a number, got {}", value.type_name()).into())
}

fn option_string(options: &Map, key: &str) -> Option<String> {
    options.get(key).filter(|v| !v.is_unit()).map(stringify_dynamic)
}

fn text_spec(value: &Dynamic, size: &Dynamic, height: &Dynamic, options: &Map) -> ScriptResult<TextSpec> {
    let mut spec = TextSpec::new(
        stringify_dynamic(value),
        number("text", "size", size)?,
        number("text", "height", height)?,
    );
    if let Some(font) = option_string(options, "font") {
        spec.font = font;
    }
    if let Some(kind) = option_string(options, "kind") {
        spec.kind = kind;
    }
    if let Some(halign) = option_string(options, "halign") {
        spec.halign = halign;
    }
    if let Some(valign) = option_string(options, "valign") {
        spec.valign = valign;
    }
    Ok(spec)
}

fn kernel_error(err: crate::error::KernelError) -> Box<EvalAltResult> {
    script_error(ParamError::from(err))
}

/// Register the `Solid` type, `workplane()` and the modelling methods.
pub fn register_geometry_api(engine: &mut Engine, kernel: Rc<dyn GeometryKernel>) {
    engine.register_type_with_name::<Solid>("Solid");

    let k = kernel.clone();
    engine.register_fn("workplane", move || k.workplane());

    let k = kernel.clone();
    engine.register_fn(
        "box",
        move |s: &mut Solid, w: Dynamic, d: Dynamic, h: Dynamic| -> ScriptResult<Solid> {
            let (w, d, h) = (number("box", "width", &w)?, number("box", "depth", &d)?, number("box", "height", &h)?);
            k.cuboid(s, w, d, h).map_err(kernel_error)
        },
    );

    let k = kernel.clone();
    engine.register_fn("sphere", move |s: &mut Solid, r: Dynamic| -> ScriptResult<Solid> {
        k.sphere(s, number("sphere", "radius", &r)?).map_err(kernel_error)
    });

    let k = kernel.clone();
    engine.register_fn(
        "text",
        move |s: &mut Solid, value: Dynamic, size: Dynamic, height: Dynamic| -> ScriptResult<Solid> {
            let spec = text_spec(&value, &size, &height, &Map::new())?;
            k.text(s, &spec).map_err(kernel_error)
        },
    );

    let k = kernel.clone();
    engine.register_fn(
        "text",
        move |s: &mut Solid, value: Dynamic, size: Dynamic, height: Dynamic, options: Map| -> ScriptResult<Solid> {
            let spec = text_spec(&value, &size, &height, &options)?;
            k.text(s, &spec).map_err(kernel_error)
        },
    );

    let k = kernel.clone();
    engine.register_fn(
        "translate",
        move |s: &mut Solid, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<Solid> {
            let by = DVec3::new(
                number("translate", "x", &x)?,
                number("translate", "y", &y)?,
                number("translate", "z", &z)?,
            );
            Ok(k.translate(s, by))
        },
    );

    let k = kernel;
    engine.register_fn("center", move |s: &mut Solid, x: Dynamic, y: Dynamic| -> ScriptResult<Solid> {
        Ok(k.center(s, number("center", "x", &x)?, number("center", "y", &y)?))
    });

    engine.register_get("is_empty", |s: &mut Solid| s.is_empty());
    engine.register_get("parts", |s: &mut Solid| s.parts().len() as i64);
    engine.register_fn("to_string", |s: &mut Solid| format!("Solid({} parts)", s.parts().len()));
    engine.register_fn("to_debug", |s: &mut Solid| format!("{s:?}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PreviewKernel;
    use crate::script_diagnostics::param_error;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register_geometry_api(&mut engine, Rc::new(PreviewKernel));
        engine
    }

    #[test]
    fn test_chained_modelling() {
        let solid: Solid = engine()
            .eval("workplane().center(2, 0).sphere(0.5).translate(4, 0, 0)")
            .unwrap();
        let center = solid.bounds().unwrap().center();
        assert_eq!(center, DVec3::new(6.0, 0.0, 0.0));
    }

    #[test]
    fn test_text_options() {
        let solid: Solid = engine()
            .eval(r#"workplane().text("Hello", 2.0, 1, #{ halign: "left", kind: "bold" })"#)
            .unwrap();
        assert_eq!(solid.bounds().unwrap().min.x, 0.0);
    }

    #[test]
    fn test_kernel_rejection_is_build_failure() {
        let err = engine().eval::<Solid>("workplane().box(0, 1, 1)").unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::BuildFailure { .. })));

        assert!(engine().eval::<Solid>(r#"workplane().sphere("big")"#).is_err());
    }
}
