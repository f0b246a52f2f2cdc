use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    clap::Subcommand,
    parley_config::{Severity, validate},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check,
}

pub fn handle_config(action: &ConfigAction, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check => check(explicit.map(Path::to_path_buf)),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(explicit: Option<PathBuf>) -> Result<()> {
    let path = explicit.or_else(parley_config::find_config_file);
    let config = match &path {
        Some(path) => {
            eprintln!("Checking {}\n", path.display());
            parley_config::load_config(path)?
        },
        None => {
            eprintln!("No config file found; checking defaults.\n");
            Default::default()
        },
    };

    let result = validate(&config);
    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if !result.diagnostics.is_empty() {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
