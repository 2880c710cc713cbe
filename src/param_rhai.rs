//! Rhai integration for parameter trees.
//!
//! # Example (Rhai)
//! ```rhai
//! let p = param("box", [
//!     #{ name: "Height", type: "float", value: 1 },
//!     #{ name: "Width", type: "float", value: 1 },
//! ]);
//! let h = p["Height"];
//! p["Width"] = 2.5;
//! ```
//!
//! `param` goes through the session registry: the first call for a root name
//! builds the tree, later calls (every re-evaluation) return the live one
//! with the user's edits. When the schema is given as a closure, the closure
//! only runs on that first call.

use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, NativeCallContext, Position};

use crate::error::ParamError;
use crate::registry::ParamRegistry;
use crate::schema::{ParamSpec, PolicySpec};
use crate::tree::ParamTree;
use crate::value::ParamValue;

/// Raise a library error inside the script, keeping its kind.
pub fn script_error(err: ParamError) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(err), Position::NONE).into()
}

pub fn value_to_dynamic(value: ParamValue) -> Dynamic {
    match value {
        ParamValue::Float(f) => Dynamic::from(f),
        ParamValue::Int(i) => Dynamic::from(i),
        ParamValue::Bool(b) => Dynamic::from(b),
        ParamValue::Str(s) | ParamValue::Enum(s) | ParamValue::Font(s) => Dynamic::from(s),
    }
}

pub fn dynamic_to_value(path: &str, value: &Dynamic) -> Result<ParamValue, ParamError> {
    if let Ok(f) = value.as_float() {
        return Ok(ParamValue::Float(f));
    }
    if let Ok(i) = value.as_int() {
        return Ok(ParamValue::Int(i));
    }
    if let Ok(b) = value.as_bool() {
        return Ok(ParamValue::Bool(b));
    }
    if value.is_string() {
        return Ok(ParamValue::Str(value.to_string()));
    }
    Err(ParamError::constraint(
        path,
        format!("cannot store a script value of type {}", value.type_name()),
    ))
}

/// Turn a script schema (array of children, or a group map) into a root
/// group descriptor named `root`.
pub fn schema_from_dynamic(root: &str, schema: &Dynamic, policy: Option<&Dynamic>) -> Result<ParamSpec, ParamError> {
    let invalid = |e: &dyn std::fmt::Display| ParamError::constraint(root, format!("invalid schema: {e}"));

    let json: serde_json::Value = rhai::serde::from_dynamic(schema).map_err(|e| invalid(&e))?;
    let mut spec = match json {
        serde_json::Value::Array(_) => {
            let children: Vec<ParamSpec> = serde_json::from_value(json).map_err(|e| invalid(&e))?;
            ParamSpec::group(root, children)
        }
        serde_json::Value::Object(_) => {
            let mut spec: ParamSpec = serde_json::from_value(json).map_err(|e| invalid(&e))?;
            if spec.name.is_empty() {
                spec.name = root.to_string();
            }
            spec.ty.get_or_insert_with(|| "group".to_string());
            spec
        }
        other => return Err(invalid(&format!("expected an array or a map, got {other}"))),
    };

    if let Some(policy) = policy {
        let json: serde_json::Value = rhai::serde::from_dynamic(policy).map_err(|e| invalid(&e))?;
        let policy: PolicySpec = serde_json::from_value(json).map_err(|e| invalid(&e))?;
        spec.policy = Some(policy);
    }
    Ok(spec)
}

fn acquire(
    registry: &ParamRegistry,
    name: &str,
    schema: impl FnOnce() -> Result<ParamSpec, Box<EvalAltResult>>,
) -> Result<ParamTree, Box<EvalAltResult>> {
    // Script errors raised by a schema closure are passed through untouched.
    let mut script_failure = None;
    let result = registry.acquire(name, || match schema() {
        Ok(spec) => ParamTree::from_group(&spec),
        Err(err) => {
            script_failure = Some(err);
            Err(ParamError::build_failure(name, "schema closure failed"))
        }
    });
    match (result, script_failure) {
        (_, Some(err)) => Err(err),
        (Ok(tree), None) => Ok(tree),
        (Err(err), None) => Err(script_error(err)),
    }
}

/// Register the `Params` type and the `param` functions.
pub fn register_param_api(engine: &mut Engine, registry: Rc<ParamRegistry>) {
    engine.register_type_with_name::<ParamTree>("Params");

    let r = registry.clone();
    engine.register_fn("param", move |name: &str, children: rhai::Array| {
        acquire(&r, name, || {
            schema_from_dynamic(name, &Dynamic::from(children), None).map_err(script_error)
        })
    });

    let r = registry.clone();
    engine.register_fn("param", move |name: &str, children: rhai::Array, policy: Map| {
        acquire(&r, name, || {
            schema_from_dynamic(name, &Dynamic::from(children), Some(&Dynamic::from(policy)))
                .map_err(script_error)
        })
    });

    let r = registry.clone();
    engine.register_fn("param", move |name: &str, group: Map| {
        acquire(&r, name, || {
            schema_from_dynamic(name, &Dynamic::from(group), None).map_err(script_error)
        })
    });

    let r = registry.clone();
    engine.register_fn(
        "param",
        move |ctx: NativeCallContext, name: &str, builder: FnPtr| {
            acquire(&r, name, || {
                let schema: Dynamic = builder.call_within_context(&ctx, ())?;
                schema_from_dynamic(name, &schema, None).map_err(script_error)
            })
        },
    );

    let r = registry;
    engine.register_fn(
        "param",
        move |ctx: NativeCallContext, name: &str, builder: FnPtr, policy: Map| {
            acquire(&r, name, || {
                let schema: Dynamic = builder.call_within_context(&ctx, ())?;
                schema_from_dynamic(name, &schema, Some(&Dynamic::from(policy))).map_err(script_error)
            })
        },
    );

    engine.register_get("name", |t: &mut ParamTree| t.name().to_string());

    engine.register_indexer_get(|t: &mut ParamTree, path: ImmutableString| {
        t.get(&path).map(value_to_dynamic).map_err(script_error)
    });
    engine.register_indexer_set(|t: &mut ParamTree, path: ImmutableString, value: Dynamic| {
        set(t, &path, &value)
    });

    engine.register_fn("get", |t: &mut ParamTree, path: &str| {
        t.get(path).map(value_to_dynamic).map_err(script_error)
    });
    engine.register_fn("set", |t: &mut ParamTree, path: &str, value: Dynamic| set(t, path, &value));
    engine.register_fn("visible", |t: &mut ParamTree, path: &str| {
        t.is_visible(path).map_err(script_error)
    });
    engine.register_fn("contains", |t: &mut ParamTree, path: &str| t.get(path).is_ok());

    engine.register_fn("to_string", |t: &mut ParamTree| format!("Params({})", t.name()));
    engine.register_fn("to_debug", |t: &mut ParamTree| format!("{t:?}"));
}

fn set(tree: &ParamTree, path: &str, value: &Dynamic) -> Result<(), Box<EvalAltResult>> {
    let value = dynamic_to_value(path, value).map_err(script_error)?;
    tree.set(path, value).map_err(script_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_diagnostics::param_error;

    fn engine() -> (Engine, Rc<ParamRegistry>) {
        let registry = Rc::new(ParamRegistry::new());
        let mut engine = Engine::new();
        register_param_api(&mut engine, registry.clone());
        (engine, registry)
    }

    #[test]
    fn test_param_array_form() {
        let (engine, registry) = engine();
        let h: f64 = engine
            .eval(
                r#"
                let p = param("box", [#{ name: "Height", type: "float", value: 1 }]);
                p["Height"] = 3;
                p["Height"]
                "#,
            )
            .unwrap();
        assert_eq!(h, 3.0);
        assert_eq!(registry.names(), vec!["box".to_string()]);
    }

    #[test]
    fn test_closure_runs_only_once() {
        let (engine, _) = engine();
        let script = r#"
            let calls = 0;
            for i in 0..3 {
                param("c1", || { calls += 1; [#{ name: "Width", value: 1.0 }] });
            }
            calls
        "#;
        let calls: i64 = engine.eval(script).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_policy_from_script() {
        let (engine, registry) = engine();
        engine
            .run(
                r#"
                let c = param("c1", [
                    #{ name: "Shape", type: "list", value: "box", limits: ["box", "sphere"] },
                    #{ name: "Width", type: "float", value: 1.0 },
                    #{ name: "Height", type: "float", value: 1.0 },
                ], #{ discriminator: "Shape", cases: #{ box: ["Width", "Height"], sphere: ["Height"] } });
                c.set("Shape", "sphere");
                if c.visible("Width") { throw "still visible"; }
                "#,
            )
            .unwrap();
        let tree = registry.get("c1").unwrap();
        assert_eq!(tree.get("Width").unwrap(), ParamValue::Float(1.0));
    }

    #[test]
    fn test_errors_keep_their_kind() {
        let (engine, _) = engine();
        let err = engine
            .run(r#"let p = param("box", [#{ name: "W", value: 1.0 }]); p["Missing"]"#)
            .unwrap_err();
        assert_eq!(param_error(&err), Some(ParamError::not_found("Missing")));

        let err = engine
            .run(
                r#"let p = param("k", [#{ name: "K", type: "list", value: "a", limits: ["a"] }]);
                   p.set("K", "b");"#,
            )
            .unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::ConstraintViolation { .. })));

        let err = engine.run(r#"param("", [])"#).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_param_group_map_form() {
        let (engine, registry) = engine();
        let h: f64 = engine
            .eval(
                r#"
                let p = param("t", #{ children: [#{ name: "Height", type: "float", value: 2 }] });
                p["Height"]
                "#,
            )
            .unwrap();
        assert_eq!(h, 2.0);
        assert_eq!(registry.get("t").unwrap().name(), "t");
    }

    #[test]
    fn test_schema_from_group_map() {
        let spec = schema_from_dynamic(
            "t",
            &Dynamic::from({
                let mut m = Map::new();
                m.insert("children".into(), Dynamic::from(rhai::Array::new()));
                m
            }),
            None,
        )
        .unwrap();
        assert_eq!(spec.name, "t");
        assert_eq!(spec.ty.as_deref(), Some("group"));

        assert!(schema_from_dynamic("t", &Dynamic::from(1_i64), None).is_err());
    }
}
