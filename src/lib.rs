pub mod error;
pub mod config;

// Parameter core
pub mod value;
pub mod schema;
pub mod change;
pub mod policy;
pub mod tree;
pub mod registry;

// Geometry and display
pub mod geometry;
pub mod slots;
pub mod viewport;
pub mod pipeline;
pub mod session;

// Scripting
pub mod scripting;
pub mod script_log;
pub mod script_diagnostics;
pub mod param_rhai;
pub mod geometry_rhai;

pub mod cli;
