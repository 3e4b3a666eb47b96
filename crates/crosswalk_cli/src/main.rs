//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `crosswalk_core` linkage.
//! - When `CROSSWALK_SETTINGS` names a settings file, load the CSV registry
//!   and print per-table row counts.

use crosswalk_core::{RegistryStore, Settings};
use std::process::ExitCode;

const SETTINGS_ENV: &str = "CROSSWALK_SETTINGS";

fn main() -> ExitCode {
    println!("crosswalk_core ping={}", crosswalk_core::ping());
    println!("crosswalk_core version={}", crosswalk_core::core_version());

    let Ok(path) = std::env::var(SETTINGS_ENV) else {
        return ExitCode::SUCCESS;
    };
    match registry_counts(&path) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("crosswalk registry error={err}");
            ExitCode::FAILURE
        }
    }
}

fn registry_counts(path: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let settings = Settings::load(path)?;
    settings.init_logging()?;
    let snapshot = settings.csv_store().load_snapshot()?;

    let environments: Vec<&str> = settings.environments.iter().map(|e| e.as_str()).collect();
    Ok(vec![
        format!("crosswalk environments={}", environments.join(",")),
        format!("crosswalk protocols={}", snapshot.protocols.len()),
        format!("crosswalk forms={}", snapshot.forms.len()),
        format!("crosswalk fields={}", snapshot.fields.len()),
    ])
}
