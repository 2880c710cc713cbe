//! Rhai script host for live parametric models.
//!
//! A model script declares parameter trees with `param(...)`, models solids
//! and publishes them with `show_object(...)`. The host evaluates the whole
//! script once per pass; parameter edits between passes are delivered as
//! turns that end in [`ScriptHost::end_turn`].
//!
//! Available API:
//! - `param(name, children)`, `param(name, || children)`,
//!   `param(name, children, policy)` - Declare (or fetch) a parameter tree
//! - `p["Name"]`, `p.get(path)`, `p.set(path, value)`, `p.visible(path)`,
//!   `p.name` - Read and edit parameters
//! - `workplane()` then `.box(w, d, h)`, `.sphere(r)`,
//!   `.text(value, size, height[, options])`, `.translate(x, y, z)`,
//!   `.center(x, y)` - Model solids
//! - `show_object(solid[, options])`, `show_object(options)` - Publish to a
//!   display slot. Options: `name`, `color`, `visible`, `param`, `build`
//!
//! Logging:
//! - `print(value)`, `debug(value)` - Routed to the host log
//! - `log.info(value)`, `log.warn(value)`, `log.error(value)`
//!
//! A slot with `param` and `build` is rebuilt by calling `build(param)`
//! whenever the tree changes. A slot with `param` but no `build` makes the
//! host re-evaluate the whole script instead.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map, Scope, AST};

use crate::config::HostConfig;
use crate::error::ParamError;
use crate::geometry::Solid;
use crate::geometry_rhai::register_geometry_api;
use crate::param_rhai::{register_param_api, script_error};
use crate::pipeline::FlushReport;
use crate::script_diagnostics::{
    from_eval_error, from_param_error, from_parse_error, param_error, Diagnostics, ScriptDiagnostic,
    ScriptPhase,
};
use crate::script_log::{LogLevel, LogLine, ScriptLogger};
use crate::session::Session;
use crate::slots::{BuildFn, PublishOptions};
use crate::tree::{NodeOutline, ParamTree};
use crate::value::ParamValue;
use crate::viewport::{EntitySummary, SceneViewport};

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// The compiled script, shared with build closures. The engine is held
/// weakly: closures stored in slots must not keep the engine alive.
#[derive(Default)]
struct LoadedScript {
    engine: Weak<Engine>,
    ast: Option<Rc<AST>>,
}

/// Scripting host that owns the Rhai engine and one document session.
pub struct ScriptHost {
    engine: Rc<Engine>,
    script: Rc<RefCell<LoadedScript>>,
    session: Rc<Session>,
    viewport: SceneViewport,
    logger: ScriptLogger,
    /// Last error message (for display/debugging)
    pub last_error: Option<String>,
}

impl ScriptHost {
    /// Create a host with sandboxed engine settings from `config`.
    pub fn new(config: &HostConfig) -> Self {
        let viewport = SceneViewport::new();
        let diagnostics = Diagnostics::with_capacity(config.max_diagnostics);
        let session = Rc::new(Session::with_kernel(
            Rc::new(viewport.clone()),
            Rc::new(crate::geometry::PreviewKernel),
            diagnostics,
        ));
        let logger = ScriptLogger::new(config.max_logs_per_pass);
        let script = Rc::new(RefCell::new(LoadedScript::default()));

        let mut engine = Engine::new();

        // Sandbox settings
        engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_operations(config.max_operations);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(config.max_array_size);
        engine.set_max_map_size(config.max_map_size);

        let l = logger.clone();
        engine.on_print(move |s| l.log(LogLevel::Info, s));
        let l = logger.clone();
        engine.on_debug(move |s, _source, pos| match pos.line() {
            Some(line) => l.log(LogLevel::Debug, &format!("[line {line}] {s}")),
            None => l.log(LogLevel::Debug, s),
        });

        engine.register_type_with_name::<ScriptLogger>("Logger");
        engine
            .register_fn("info", |l: &mut ScriptLogger, value: Dynamic| l.info(value))
            .register_fn("warn", |l: &mut ScriptLogger, value: Dynamic| l.warn(value))
            .register_fn("error", |l: &mut ScriptLogger, value: Dynamic| l.error(value));

        register_param_api(&mut engine, session.registry().clone());
        register_geometry_api(&mut engine, session.kernel().clone());
        register_display_api(&mut engine, session.clone(), script.clone());

        let engine = Rc::new(engine);
        script.borrow_mut().engine = Rc::downgrade(&engine);

        Self {
            engine,
            script,
            session,
            viewport,
            logger,
            last_error: None,
        }
    }

    fn push_diagnostic(&mut self, diag: ScriptDiagnostic) {
        self.last_error = Some(diag.message.clone());
        self.session.diagnostics().push(diag);
    }

    /// Compile a script and make it the current one.
    /// Returns true if successful, false if there was a compilation error;
    /// the previous script stays current in that case.
    pub fn load(&mut self, source: &str) -> bool {
        match self.engine.compile(source) {
            Ok(ast) => {
                self.script.borrow_mut().ast = Some(Rc::new(ast));
                self.last_error = None;
                true
            }
            Err(e) => {
                let diag = from_parse_error(&e);
                self.push_diagnostic(diag);
                false
            }
        }
    }

    /// Run the current script as one evaluation pass.
    ///
    /// On success, parameter trees the script no longer declares are
    /// evicted and slots it no longer publishes are removed. On failure
    /// nothing is removed and a diagnostic is queued.
    pub fn evaluate(&mut self) -> bool {
        let Some(ast) = self.script.borrow().ast.clone() else {
            log::warn!("No script loaded");
            return false;
        };
        self.logger.reset_pass();

        let engine = self.engine.clone();
        let logger = self.logger.clone();
        let result = self.session.run_pass(|_| {
            let mut scope = Scope::new();
            scope.push("log", logger);
            engine.run_ast_with_scope(&mut scope, &ast)
        });

        match result {
            Ok(_) => true,
            Err(e) => {
                let diag = from_eval_error(ScriptPhase::Evaluate, &e);
                self.push_diagnostic(diag);
                false
            }
        }
    }

    /// Load and evaluate, then end the turn.
    pub fn run(&mut self, source: &str) -> bool {
        let ok = self.load(source) && self.evaluate();
        self.end_turn();
        ok
    }

    /// Edit one parameter. The rebuild happens at [`ScriptHost::end_turn`].
    pub fn set(&mut self, root: &str, path: &str, value: ParamValue) -> Result<(), ParamError> {
        self.session.set(root, path, value).inspect_err(|err| {
            self.last_error = Some(err.to_string());
            self.session
                .diagnostics()
                .push(from_param_error(ScriptPhase::Evaluate, err));
        })
    }

    /// [`ScriptHost::set`] with the value given as text, parsed according
    /// to the parameter's declared type.
    pub fn set_text(&mut self, root: &str, path: &str, text: &str) -> Result<(), ParamError> {
        let parsed = self
            .session
            .tree(root)
            .ok_or_else(|| ParamError::not_found(root))
            .and_then(|tree| tree.value_type(path))
            .and_then(|ty| ParamValue::parse(ty, text).map_err(|reason| ParamError::constraint(path, reason)));
        match parsed {
            Ok(value) => self.set(root, path, value),
            Err(err) => {
                self.push_diagnostic(from_param_error(ScriptPhase::Evaluate, &err));
                Err(err)
            }
        }
    }

    /// End the current turn: run scheduled rebuilds. If a changed tree is
    /// bound to a slot without a build closure, the whole script is
    /// evaluated once more first.
    ///
    /// Each slot is built at most once per turn: slots the re-evaluation
    /// publishes leave the queue, and only what was scheduled before it is
    /// flushed afterwards. Slots rebuilt by the re-evaluation are not listed
    /// in `rebuilt`.
    pub fn end_turn(&mut self) -> FlushReport {
        let pipeline = self.session.pipeline().clone();
        let stale = pipeline.take_stale();
        if stale.is_empty() {
            return pipeline.flush();
        }

        log::info!("{} stale slot(s), re-evaluating script", stale.len());
        let scheduled = pipeline.pending();
        self.evaluate();
        let mut report = pipeline.flush_only(&scheduled);
        report.stale = stale;
        report
    }

    /// Drain and return all pending diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<ScriptDiagnostic> {
        self.session.diagnostics().take()
    }

    /// Drain the script's log output.
    pub fn take_logs(&mut self) -> Vec<LogLine> {
        self.logger.take_lines()
    }

    /// Outlines of every live parameter tree, sorted by root name.
    pub fn outline(&self) -> Vec<NodeOutline> {
        self.session
            .registry()
            .trees()
            .iter()
            .map(ParamTree::outline)
            .collect()
    }

    pub fn scene(&self) -> Vec<EntitySummary> {
        self.viewport.summary()
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    pub fn viewport(&self) -> &SceneViewport {
        &self.viewport
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new(&HostConfig::default())
    }
}

/// Register `show_object`.
fn register_display_api(engine: &mut Engine, session: Rc<Session>, script: Rc<RefCell<LoadedScript>>) {
    let s = session.clone();
    engine.register_fn("show_object", move |solid: Solid| -> ScriptResult<()> {
        s.publish(Ok(solid), PublishOptions::default())
            .map(|_| ())
            .map_err(script_error)
    });

    let s = session.clone();
    let current = script.clone();
    engine.register_fn("show_object", move |solid: Solid, options: Map| -> ScriptResult<()> {
        let options = publish_options(&options, &current)?;
        s.publish(Ok(solid), options).map(|_| ()).map_err(script_error)
    });

    let s = session;
    let current = script;
    engine.register_fn("show_object", move |options: Map| -> ScriptResult<()> {
        let options = publish_options(&options, &current)?;
        let Some(build) = options.build.clone() else {
            return Err("show_object: options without a solid need a `build` function".into());
        };
        let label = options.name.clone();
        match s.publish(build(), options) {
            Ok(_) => Ok(()),
            // The slot stays empty; the rest of the script still runs.
            Err(err @ ParamError::BuildFailure { .. }) => {
                let mut diag = from_param_error(ScriptPhase::Evaluate, &err);
                if let Some(label) = label {
                    diag = diag.with_slot(label);
                }
                s.diagnostics().push(diag);
                Ok(())
            }
            Err(err) => Err(script_error(err)),
        }
    });
}

fn publish_options(map: &Map, script: &Rc<RefCell<LoadedScript>>) -> ScriptResult<PublishOptions> {
    let mut options = PublishOptions::default();
    let present = |key: &str| map.get(key).filter(|v| !v.is_unit());

    if let Some(name) = present("name") {
        if !name.is_string() {
            return Err(format!("show_object: name must be a string, got {}", name.type_name()).into());
        }
        options.name = Some(name.to_string());
    }

    if let Some(color) = present("color") {
        options.color = Some(parse_color(color)?);
    }

    if let Some(visible) = present("visible") {
        options.visible = Some(
            visible
                .as_bool()
                .map_err(|t| format!("show_object: visible must be a bool, got {t}"))?,
        );
    }

    if let Some(param) = present("param") {
        let tree = param
            .clone()
            .try_cast::<ParamTree>()
            .ok_or_else(|| format!("show_object: param must be a Params handle, got {}", param.type_name()))?;
        options.param = Some(tree);
    }

    if let Some(build) = present("build") {
        let fn_ptr = build
            .clone()
            .try_cast::<FnPtr>()
            .ok_or_else(|| format!("show_object: build must be a function, got {}", build.type_name()))?;
        options.build = Some(build_fn(fn_ptr, options.param.clone(), script.clone()));
    }

    Ok(options)
}

fn parse_color(value: &Dynamic) -> ScriptResult<[f32; 4]> {
    let bad = || -> Box<EvalAltResult> { "show_object: color must be [r, g, b] or [r, g, b, a]".into() };
    let channels = value.clone().try_cast::<rhai::Array>().ok_or_else(bad)?;
    if !(3..=4).contains(&channels.len()) {
        return Err(bad());
    }

    let mut rgba = [1.0_f32; 4];
    for (slot, channel) in rgba.iter_mut().zip(&channels) {
        let v = channel
            .as_float()
            .or_else(|_| channel.as_int().map(|i| i as f64))
            .map_err(|_| bad())?;
        *slot = v as f32;
    }
    Ok(rgba)
}

/// Wrap a script function as a slot build closure. It is called with the
/// bound tree as its only argument (or none when nothing is bound).
fn build_fn(fn_ptr: FnPtr, tree: Option<ParamTree>, script: Rc<RefCell<LoadedScript>>) -> BuildFn {
    Rc::new(move || {
        let (engine, ast) = {
            let loaded = script.borrow();
            (loaded.engine.upgrade(), loaded.ast.clone())
        };
        let (Some(engine), Some(ast)) = (engine, ast) else {
            return Err(ParamError::build_failure(fn_ptr.fn_name(), "no script is loaded"));
        };

        let result = match &tree {
            Some(tree) => fn_ptr.call::<Solid>(&engine, &ast, (tree.clone(),)),
            None => fn_ptr.call::<Solid>(&engine, &ast, ()),
        };
        result.map_err(|e| match param_error(&e) {
            Some(err @ ParamError::BuildFailure { .. }) => err,
            _ => ParamError::build_failure(fn_ptr.fn_name(), e.to_string()),
        })
    })
}
