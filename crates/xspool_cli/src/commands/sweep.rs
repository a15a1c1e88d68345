//! Sweep command implementation.

use serde::Serialize;
use std::path::Path;
use xspool_storage::temp::sweep_orphans;

/// Outcome of sweeping a scratch root.
#[derive(Debug, Serialize)]
pub struct SweepResult {
    /// Root that was swept.
    pub root: String,
    /// Orphaned scratch directories that were deleted.
    pub reclaimed: Vec<String>,
    /// Scratch directories still owned by a live instance.
    pub live: Vec<String>,
    /// Scratch directories that could not be examined.
    pub failed: Vec<String>,
}

/// Runs the sweep command.
pub fn run(root: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !root.is_dir() {
        return Err(format!("Not a directory: {}", root.display()).into());
    }

    let report = sweep_orphans(root)?;
    let list = |paths: &[std::path::PathBuf]| -> Vec<String> {
        paths.iter().map(|p| p.display().to_string()).collect()
    };
    let result = SweepResult {
        root: root.display().to_string(),
        reclaimed: list(&report.reclaimed),
        live: list(&report.live),
        failed: list(&report.failed),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }

    if result.failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} scratch directories could not be examined", result.failed.len()).into())
    }
}

fn print_text(result: &SweepResult) {
    println!("Scratch root: {}", result.root);
    println!("  Reclaimed: {}", result.reclaimed.len());
    for path in &result.reclaimed {
        println!("    {}", path);
    }
    println!("  Live:      {}", result.live.len());
    for path in &result.live {
        println!("    {}", path);
    }
    if !result.failed.is_empty() {
        println!("  Failed:    {}", result.failed.len());
        for path in &result.failed {
            println!("    {}", path);
        }
    }
}
