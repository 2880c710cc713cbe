//! One open document: registry, pipeline, kernel and diagnostics together.
//!
//! The session is what an editor holds per document. It brackets evaluation
//! passes so both sweeps (undeclared trees, unpublished slots) run only after
//! a successful pass, and it ends each turn with a pipeline flush.

use std::rc::Rc;

use serde::Serialize;

use crate::error::{ParamError, Result};
use crate::geometry::{GeometryKernel, PreviewKernel, Solid};
use crate::pipeline::{FlushReport, RebuildPipeline};
use crate::registry::ParamRegistry;
use crate::script_diagnostics::{from_param_error, Diagnostics, ScriptPhase};
use crate::slots::{PublishOptions, SlotKey};
use crate::tree::ParamTree;
use crate::value::ParamValue;
use crate::viewport::Viewport;

/// What a successful pass cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub evicted: Vec<String>,
    pub swept: Vec<SlotKey>,
}

pub struct Session {
    registry: Rc<ParamRegistry>,
    pipeline: Rc<RebuildPipeline>,
    kernel: Rc<dyn GeometryKernel>,
    diagnostics: Diagnostics,
}

impl Session {
    /// Session on the preview kernel.
    pub fn new(viewport: Rc<dyn Viewport>) -> Self {
        Self::with_kernel(viewport, Rc::new(PreviewKernel), Diagnostics::default())
    }

    pub fn with_kernel(
        viewport: Rc<dyn Viewport>,
        kernel: Rc<dyn GeometryKernel>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            registry: Rc::new(ParamRegistry::new()),
            pipeline: Rc::new(RebuildPipeline::new(viewport, diagnostics.clone())),
            kernel,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &Rc<ParamRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Rc<RebuildPipeline> {
        &self.pipeline
    }

    pub fn kernel(&self) -> &Rc<dyn GeometryKernel> {
        &self.kernel
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn acquire<F>(&self, root: &str, build: F) -> Result<ParamTree>
    where
        F: FnOnce() -> Result<ParamTree>,
    {
        self.registry.acquire(root, build)
    }

    pub fn publish(&self, geometry: Result<Solid>, options: PublishOptions) -> Result<SlotKey> {
        self.pipeline.publish(geometry, options)
    }

    /// Run one evaluation pass.
    ///
    /// On success, trees `body` did not acquire are evicted and slots it did
    /// not publish are swept. On failure nothing is swept and the error is
    /// returned untouched; reporting it is up to the caller.
    pub fn run_pass<F, E>(&self, body: F) -> std::result::Result<PassReport, E>
    where
        F: FnOnce(&Session) -> std::result::Result<(), E>,
    {
        self.registry.begin_pass();
        self.pipeline.begin_pass();

        if let Err(err) = body(self) {
            self.registry.abort_pass();
            self.pipeline.abort_pass();
            return Err(err);
        }

        let evicted = self.registry.end_pass();
        let swept = self.pipeline.end_pass();
        log::info!(
            "Pass complete: {} trees, {} slots ({} evicted, {} swept)",
            self.registry.len(),
            self.pipeline.len(),
            evicted.len(),
            swept.len()
        );
        Ok(PassReport { evicted, swept })
    }

    /// [`Session::run_pass`] for Rust callers; a failure is also pushed to
    /// the diagnostics queue.
    pub fn evaluate<F>(&self, body: F) -> Result<PassReport>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        self.run_pass(body).inspect_err(|err| {
            self.diagnostics
                .push(from_param_error(ScriptPhase::Evaluate, err));
        })
    }

    /// Run `body` as one event-loop turn: its edits are applied, then the
    /// pipeline flushes. The flush happens even if `body` fails part-way.
    pub fn turn<F>(&self, body: F) -> Result<FlushReport>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        let outcome = body(self);
        let report = self.end_turn();
        outcome.map(|()| report)
    }

    /// End the current turn: run scheduled rebuilds.
    pub fn end_turn(&self) -> FlushReport {
        self.pipeline.flush()
    }

    /// Set `path` in the tree registered under `root`.
    pub fn set(&self, root: &str, path: &str, value: ParamValue) -> Result<()> {
        let tree = self
            .registry
            .get(root)
            .ok_or_else(|| ParamError::not_found(root))?;
        tree.set(path, value)
    }

    pub fn tree(&self, root: &str) -> Option<ParamTree> {
        self.registry.get(root)
    }

    /// Drop every tree and slot.
    pub fn reset(&self) {
        self.pipeline.clear();
        self.registry.clear();
    }
}
