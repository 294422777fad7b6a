//! Rebuild command implementation

use anyhow::{Context, Result};
use pkgdb::prelude::*;

pub fn execute(config: DbConfig, json: bool) -> Result<()> {
    let path = config.data_file();
    TerminationController::global()
        .install_signal_listener()
        .context("Failed to install signal listener")?;

    let report = Database::rebuild(&config, None)
        .with_context(|| format!("Rebuild of {} failed", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Rebuilt {}: {} headers in {:.2?} (next instance {})",
            path.display(),
            report.records,
            report.elapsed,
            report.next_instance
        );
    }
    Ok(())
}
