//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions, and the
//! core raises [`ParamError`]s. Both are wrapped into a stable,
//! JSON-serializable diagnostic that an editor can surface without access to
//! Rust logs. Every failure a user should see ends up in one [`Diagnostics`]
//! queue shared by the script host and the rebuild pipeline.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rhai::EvalAltResult;
use serde::Serialize;

use crate::error::{ErrorKind, ParamError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code, including failed builds.
    RuntimeError,
    /// Script attempted to use the host API incorrectly (missing members,
    /// unknown parameters, values outside their constraints).
    HostApiMisuse,
    /// Internal/host error.
    HostError,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    /// A full evaluation pass of the script.
    Evaluate,
    /// A triggered rebuild of one display slot.
    Rebuild,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Library error kind, when the failure came from the parameter core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Display slot the failure belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    /// Raw engine error string (useful for bug reports).
    #[serde(default)]
    pub raw: Option<String>,
}

impl ScriptDiagnostic {
    pub fn with_slot(mut self, slot: impl ToString) -> Self {
        self.slot = Some(slot.to_string());
        self
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("index")
        || lower.contains("map key")
        || lower.contains("mismatched types")
        || lower.contains("invalid")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn classify_error(err: &ParamError) -> ScriptDiagnosticKind {
    match err {
        ParamError::BuildFailure { .. } => ScriptDiagnosticKind::RuntimeError,
        _ => ScriptDiagnosticKind::HostApiMisuse,
    }
}

fn location(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(0) as u32;
    Some(ScriptLocation {
        line,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    let raw = err.to_string();
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: raw.clone(),
        location: location(err.position()),
        error: None,
        slot: None,
        raw: Some(raw),
    }
}

/// Find a [`ParamError`] thrown by a host function, looking through the
/// function-call frames Rhai wraps it in.
pub fn param_error(err: &EvalAltResult) -> Option<ParamError> {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => value.clone().try_cast::<ParamError>(),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => param_error(inner),
        _ => None,
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &EvalAltResult) -> ScriptDiagnostic {
    let raw = err.to_string();
    let (kind, message, error) = match param_error(err) {
        Some(param) => (classify_error(&param), param.to_string(), Some(param.kind())),
        None => (classify_message(&raw), raw.clone(), None),
    };

    ScriptDiagnostic {
        kind,
        phase,
        message,
        location: location(err.position()),
        error,
        slot: None,
        raw: Some(raw),
    }
}

pub fn from_param_error(phase: ScriptPhase, err: &ParamError) -> ScriptDiagnostic {
    ScriptDiagnostic {
        kind: classify_error(err),
        phase,
        message: err.to_string(),
        location: None,
        error: Some(err.kind()),
        slot: None,
        raw: None,
    }
}

/// Keep a bounded queue so repeated failures don't grow without limit.
pub const MAX_DIAGNOSTICS: usize = 32;

/// Shared, bounded diagnostics queue. Clones push into the same queue.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    queue: Rc<RefCell<VecDeque<ScriptDiagnostic>>>,
    capacity: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(MAX_DIAGNOSTICS)
    }
}

impl Diagnostics {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Rc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, diag: ScriptDiagnostic) {
        match diag.phase {
            ScriptPhase::Rebuild => log::warn!(
                "Rebuild of slot {} failed: {}",
                diag.slot.as_deref().unwrap_or("?"),
                diag.message
            ),
            _ => log::warn!("Script error: {}", diag.message),
        }

        let mut queue = self.queue.borrow_mut();
        queue.push_back(diag);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Drain and return all pending diagnostics, oldest first.
    pub fn take(&self) -> Vec<ScriptDiagnostic> {
        self.queue.borrow_mut().drain(..).collect()
    }

    /// Message of the most recent diagnostic, if any is pending.
    pub fn last_message(&self) -> Option<String> {
        self.queue.borrow().back().map(|d| d.message.clone())
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Dynamic, Position};

    #[test]
    fn test_param_error_survives_function_frames() {
        let thrown = EvalAltResult::ErrorRuntime(
            Dynamic::from(ParamError::not_found("c1.Radius")),
            Position::new(3, 5),
        );
        let wrapped = EvalAltResult::ErrorInFunctionCall(
            "build".into(),
            String::new(),
            Box::new(thrown),
            Position::new(9, 1),
        );

        let diag = from_eval_error(ScriptPhase::Evaluate, &wrapped);
        assert_eq!(diag.error, Some(ErrorKind::NotFound));
        assert_eq!(diag.kind, ScriptDiagnosticKind::HostApiMisuse);
        assert_eq!(diag.message, "parameter not found: c1.Radius");
        assert_eq!(diag.location, Some(ScriptLocation { line: 9, column: 1 }));
    }

    #[test]
    fn test_plain_runtime_error() {
        let err = EvalAltResult::ErrorRuntime(Dynamic::from("boom"), Position::NONE);
        let diag = from_eval_error(ScriptPhase::Rebuild, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::RuntimeError);
        assert!(diag.error.is_none());
        assert!(diag.location.is_none());
    }

    #[test]
    fn test_queue_is_bounded() {
        let diags = Diagnostics::with_capacity(2);
        for i in 0..5 {
            diags.push(from_param_error(
                ScriptPhase::Rebuild,
                &ParamError::build_failure("slot", format!("fail {i}")),
            ));
        }
        let taken = diags.take();
        assert_eq!(taken.len(), 2);
        assert!(taken[1].message.contains("fail 4"));
        assert!(diags.is_empty());
    }
}
