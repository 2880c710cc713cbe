//! Drive the bundled demo script the way an editor would: evaluate once,
//! then apply edits turn by turn.
//!
//! Run with: cargo test --test parameter_example

use livecad::error::ErrorKind;
use livecad::geometry::Primitive;
use livecad::script_diagnostics::ScriptPhase;
use livecad::scripting::ScriptHost;
use livecad::slots::SlotKey;
use livecad::value::ParamValue;

const DEMO: &str = include_str!("../demos/parameter_example.rhai");

fn named(name: &str) -> SlotKey {
    SlotKey::Named(name.to_string())
}

fn loaded() -> ScriptHost {
    let mut host = ScriptHost::default();
    assert!(host.run(DEMO), "{:?}", host.take_diagnostics());
    assert!(host.take_diagnostics().is_empty());
    host
}

fn center_x(host: &ScriptHost, key: &SlotKey) -> f64 {
    host.viewport().get(key).unwrap().geometry.bounds().unwrap().center().x
}

#[test]
fn test_demo_publishes_every_part() {
    let host = loaded();
    let viewport = host.viewport();

    assert_eq!(viewport.len(), 5);
    for key in [SlotKey::Index(0), SlotKey::Index(1), named("c1"), named("c2"), named("text")] {
        assert!(viewport.contains(&key), "missing {key}");
    }
    assert_eq!(center_x(&host, &SlotKey::Index(1)), 2.0);
    assert_eq!(center_x(&host, &named("c1")), 4.0);
    assert_eq!(center_x(&host, &named("c2")), 6.0);

    let text = viewport.get(&named("text")).unwrap();
    assert_eq!(text.geometry.bounds().unwrap().min.x, 8.0);
    assert_eq!(text.presentation.color, [0.2, 0.4, 0.9, 1.0]);

    let roots: Vec<String> = host.outline().into_iter().map(|o| o.name).collect();
    assert_eq!(roots, ["box", "c1", "c2", "sphere", "text"]);
}

#[test]
fn test_combo_shape_edit_rebuilds_only_that_part() {
    let mut host = loaded();
    let c2_before = host.viewport().get(&named("c2")).unwrap();

    host.set_text("c1", "Shape", "sphere").unwrap();
    let report = host.end_turn();

    assert_eq!(report.rebuilt, vec![named("c1")]);
    assert!(report.stale.is_empty());

    let c1 = host.viewport().get(&named("c1")).unwrap();
    assert!(matches!(c1.geometry.parts()[0].primitive, Primitive::Sphere { radius } if radius == 0.5));
    assert_eq!(center_x(&host, &named("c1")), 4.0);

    let tree = host.session().tree("c1").unwrap();
    assert!(!tree.is_visible("Width").unwrap());
    assert!(!tree.is_visible("Depth").unwrap());
    assert!(tree.is_visible("Height").unwrap());

    let c2_after = host.viewport().get(&named("c2")).unwrap();
    assert_eq!(c2_after.shows, c2_before.shows);
}

#[test]
fn test_box_edit_reevaluates_and_keeps_other_edits() {
    let mut host = loaded();
    host.set_text("c1", "Shape", "sphere").unwrap();
    host.end_turn();

    host.set_text("box", "Width", "3").unwrap();
    let report = host.end_turn();
    assert_eq!(report.stale, vec![SlotKey::Index(0)]);

    let size = host
        .viewport()
        .get(&SlotKey::Index(0))
        .unwrap()
        .geometry
        .bounds()
        .unwrap()
        .size();
    assert_eq!(size.x, 3.0);

    // The re-evaluation picked up the live c1 tree, still a sphere.
    let c1 = host.viewport().get(&named("c1")).unwrap();
    assert!(matches!(c1.geometry.parts()[0].primitive, Primitive::Sphere { .. }));
    assert_eq!(
        host.session().tree("c1").unwrap().get("Shape").unwrap(),
        ParamValue::Enum("sphere".into())
    );
}

#[test]
fn test_text_edits() {
    let mut host = loaded();
    host.set_text("text", "Value", "Hi").unwrap();
    host.set_text("text", "Kind", "bold").unwrap();
    let report = host.end_turn();
    assert_eq!(report.rebuilt, vec![named("text")]);

    let text = host.viewport().get(&named("text")).unwrap();
    let Primitive::Text(spec) = &text.geometry.parts()[0].primitive else {
        panic!("expected text, got {:?}", text.geometry.parts());
    };
    assert_eq!(spec.text, "Hi");
    assert_eq!(spec.kind, "bold");
    assert_eq!(spec.size, 2.0);

    let err = host.set_text("text", "Kind", "oblique").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(host.take_diagnostics().len(), 1);
}

#[test]
fn test_bad_edit_reports_and_keeps_scene() {
    let mut host = loaded();

    // A failing rebuild keeps the last good geometry.
    host.set_text("c2", "Width", "-1").unwrap();
    let report = host.end_turn();
    assert_eq!(report.failed, vec![named("c2")]);
    assert_eq!(center_x(&host, &named("c2")), 6.0);

    // A failing re-evaluation keeps every slot.
    host.set_text("sphere", "Height", "-2").unwrap();
    let report = host.end_turn();
    assert_eq!(report.stale, vec![SlotKey::Index(1)]);
    assert_eq!(host.viewport().len(), 5);

    let diags = host.take_diagnostics();
    let phases: Vec<ScriptPhase> = diags.iter().map(|d| d.phase).collect();
    assert_eq!(phases, [ScriptPhase::Rebuild, ScriptPhase::Evaluate]);
    assert_eq!(diags[0].slot.as_deref(), Some("c2"));
}
