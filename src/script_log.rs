//! Script logging.
//!
//! Rhai's `print` and `debug` are routed here, and scripts also get a `log`
//! object with `info`, `warn` and `error` methods. Messages go to the `log`
//! facade under the `script` target and are kept so a host can show them
//! next to the model. A per-pass limit keeps a runaway loop from flooding
//! either.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;

/// Default number of log messages allowed per evaluation pass.
pub const MAX_LOGS_PER_PASS: u32 = 100;

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
struct LogState {
    limit: u32,
    count: Cell<u32>,
    warned: Cell<bool>,
    lines: RefCell<Vec<LogLine>>,
}

/// Logger handle registered with the engine. Clones share the counters.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    state: Rc<LogState>,
}

impl ScriptLogger {
    pub fn new(limit: u32) -> Self {
        Self {
            state: Rc::new(LogState {
                limit,
                count: Cell::new(0),
                warned: Cell::new(false),
                lines: RefCell::default(),
            }),
        }
    }

    /// Reset the per-pass counter. Call this at the start of each pass.
    pub fn reset_pass(&self) {
        self.state.count.set(0);
        self.state.warned.set(false);
    }

    /// Check if another message fits in this pass.
    fn can_log(&self) -> bool {
        let count = self.state.count.get();
        self.state.count.set(count.saturating_add(1));
        if count < self.state.limit {
            return true;
        }
        // Only warn once per pass about exceeding the limit
        if !self.state.warned.replace(true) {
            log::warn!(
                target: "script",
                "Script log limit exceeded ({} messages/pass). Further logs dropped.",
                self.state.limit
            );
        }
        false
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.can_log() {
            return;
        }
        log::log!(target: "script", level.as_log(), "{message}");
        self.state.lines.borrow_mut().push(LogLine {
            level,
            message: message.to_string(),
        });
    }

    /// Drain the messages logged since the last call.
    pub fn take_lines(&self) -> Vec<LogLine> {
        std::mem::take(&mut *self.state.lines.borrow_mut())
    }

    pub fn info(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Info, &stringify_dynamic(&value));
    }

    pub fn warn(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Warn, &stringify_dynamic(&value));
    }

    pub fn error(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Error, &stringify_dynamic(&value));
    }
}

impl Default for ScriptLogger {
    fn default() -> Self {
        Self::new(MAX_LOGS_PER_PASS)
    }
}

/// Convert a Rhai Dynamic value to a string for logging.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    if value.is_string() {
        if let Ok(s) = value.clone().into_string() {
            return s;
        }
    }

    // Arrays are space-joined so `log.info(["width", w])` reads naturally
    if value.is_array() {
        if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
            let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
            return parts.join(" ");
        }
    }

    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
                .collect();
            return format!("{{{}}}", parts.join(", "));
        }
    }

    if value.is_unit() {
        return "()".to_string();
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_string() {
        let value = rhai::Dynamic::from("hello");
        assert_eq!(stringify_dynamic(&value), "hello");
    }

    #[test]
    fn test_stringify_numbers() {
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(42_i64)), "42");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(true)), "true");
    }

    #[test]
    fn test_stringify_array() {
        let mut arr = rhai::Array::new();
        arr.push(rhai::Dynamic::from("width"));
        arr.push(rhai::Dynamic::from(3_i64));
        let value = rhai::Dynamic::from(arr);
        assert_eq!(stringify_dynamic(&value), "width 3");
    }

    #[test]
    fn test_pass_log_limit() {
        let logger = ScriptLogger::new(3);
        for i in 0..5 {
            logger.log(LogLevel::Info, &format!("line {i}"));
        }
        assert_eq!(logger.take_lines().len(), 3);

        logger.reset_pass();
        logger.log(LogLevel::Warn, "again");
        assert_eq!(
            logger.take_lines(),
            vec![LogLine {
                level: LogLevel::Warn,
                message: "again".into()
            }]
        );
    }
}
