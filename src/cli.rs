use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::HostConfig;
use crate::pipeline::FlushReport;
use crate::script_diagnostics::ScriptDiagnostic;
use crate::script_log::LogLine;
use crate::scripting::ScriptHost;
use crate::tree::NodeOutline;
use crate::viewport::EntitySummary;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a model script and print the resulting scene
    Eval {
        /// Rhai model script
        script: PathBuf,

        /// Parameter edit as root.path=value; each edit is its own turn
        #[arg(long = "set", value_name = "ROOT.PATH=VALUE")]
        edits: Vec<String>,

        /// Host configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Evaluate a model script and print its parameter trees
    Params {
        /// Rhai model script
        script: PathBuf,

        /// Host configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct EvalReport {
    ok: bool,
    turns: Vec<FlushReport>,
    scene: Vec<EntitySummary>,
    params: Vec<NodeOutline>,
    diagnostics: Vec<ScriptDiagnostic>,
    logs: Vec<LogLine>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { script, edits, config, json } => eval(&script, &edits, config.as_deref(), json),
        Commands::Params { script, config, json } => params(&script, config.as_deref(), json),
    }
}

fn host(config: Option<&Path>) -> Result<ScriptHost> {
    let config = match config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    Ok(ScriptHost::new(&config))
}

fn load_and_evaluate(host: &mut ScriptHost, script: &Path) -> Result<bool> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read script {}", script.display()))?;
    log::info!("Evaluating {}", script.display());
    Ok(host.load(&source) && host.evaluate())
}

/// Split `root.path=value` at the first '.' and the first '='.
fn parse_edit(edit: &str) -> Result<(&str, &str, &str)> {
    let Some((target, value)) = edit.split_once('=') else {
        bail!("Invalid edit {edit:?}: expected root.path=value");
    };
    let Some((root, path)) = target.split_once('.') else {
        bail!("Invalid edit {edit:?}: expected root.path=value");
    };
    if root.is_empty() || path.is_empty() {
        bail!("Invalid edit {edit:?}: root and path must not be empty");
    }
    Ok((root, path, value))
}

fn eval(script: &Path, edits: &[String], config: Option<&Path>, json: bool) -> Result<()> {
    let edits = edits
        .iter()
        .map(|e| parse_edit(e))
        .collect::<Result<Vec<_>>>()?;

    let mut host = host(config)?;
    let mut ok = load_and_evaluate(&mut host, script)?;
    let mut turns = vec![host.end_turn()];

    for (root, path, value) in edits {
        if host.set_text(root, path, value).is_err() {
            ok = false;
        }
        turns.push(host.end_turn());
    }

    let report = EvalReport {
        ok,
        turns,
        scene: host.scene(),
        params: host.outline(),
        diagnostics: host.take_diagnostics(),
        logs: host.take_logs(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.ok || !report.diagnostics.is_empty() {
        bail!("{} diagnostic(s) reported", report.diagnostics.len());
    }
    Ok(())
}

fn params(script: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let mut host = host(config)?;
    let ok = load_and_evaluate(&mut host, script)?;
    if !ok {
        for diag in host.take_diagnostics() {
            eprintln!("{}", format_diagnostic(&diag));
        }
        bail!("Script failed to evaluate");
    }

    let outlines = host.outline();
    if json {
        println!("{}", serde_json::to_string_pretty(&outlines)?);
    } else {
        for outline in &outlines {
            print_outline(outline, 0);
        }
    }
    Ok(())
}

fn format_diagnostic(diag: &ScriptDiagnostic) -> String {
    let location = diag
        .location
        .as_ref()
        .map(|l| format!(" (line {}, column {})", l.line, l.column))
        .unwrap_or_default();
    let slot = diag.slot.as_deref().map(|s| format!(" [{s}]")).unwrap_or_default();
    format!("{:?}{slot}: {}{location}", diag.phase, diag.message)
}

fn print_report(report: &EvalReport) {
    println!("Scene ({} object(s)):", report.scene.len());
    for entity in &report.scene {
        let size = entity
            .bounds
            .as_ref()
            .map(|b| {
                let s = b.size();
                format!("{:.3} x {:.3} x {:.3}", s.x, s.y, s.z)
            })
            .unwrap_or_else(|| "empty".to_string());
        let hidden = if entity.visible { "" } else { " (hidden)" };
        println!("  {:<12} {} part(s), {size}{hidden}", entity.slot.to_string(), entity.parts);
    }

    for (i, turn) in report.turns.iter().enumerate().filter(|(_, t)| !t.is_empty()) {
        println!(
            "Turn {i}: rebuilt {}, failed {}, stale {}",
            turn.rebuilt.len(),
            turn.failed.len(),
            turn.stale.len()
        );
    }

    if !report.logs.is_empty() {
        println!("Log:");
        for line in &report.logs {
            println!("  [{:?}] {}", line.level, line.message);
        }
    }

    for diag in &report.diagnostics {
        eprintln!("{}", format_diagnostic(diag));
    }
}

fn print_outline(node: &NodeOutline, depth: usize) {
    let indent = "  ".repeat(depth);
    let hidden = if node.visible { "" } else { " (hidden)" };
    match &node.value {
        Some(value) => println!("{indent}{} = {value}{hidden}", node.name),
        None => println!("{indent}{}{hidden}", node.name),
    }
    for child in &node.children {
        print_outline(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edit() {
        assert_eq!(parse_edit("c1.Width=2.5").unwrap(), ("c1", "Width", "2.5"));
        assert_eq!(parse_edit("t.Font.Family=Arial").unwrap(), ("t", "Font.Family", "Arial"));
        assert_eq!(parse_edit("t.Text=a=b").unwrap(), ("t", "Text", "a=b"));
        assert!(parse_edit("c1Width=2").is_err());
        assert!(parse_edit("c1.Width").is_err());
        assert!(parse_edit(".Width=1").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_set() {
        let cli = Cli::try_parse_from([
            "livecad", "eval", "model.rhai", "--set", "c1.Width=2", "--set", "c1.Depth=3", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Eval { edits, json, .. } => {
                assert_eq!(edits.len(), 2);
                assert!(json);
            }
            _ => panic!("expected eval"),
        }
    }
}
