//! Verify command implementation

use anyhow::{Context, Result};
use pkgdb::prelude::*;

pub fn execute(config: DbConfig, json: bool) -> Result<()> {
    let path = config.data_file();
    tracing::info!("Verifying package database: {}", path.display());

    let report = Database::verify(&config)
        .with_context(|| format!("Verification of {} failed", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\nDatabase Verification");
    println!("{}", "=".repeat(60));
    println!("Path: {}", path.display());
    println!("Headers: {}", report.records);
    if let Some(next) = report.next_instance {
        println!("Next Instance: {}", next);
    }

    println!("\nIndexes:");
    for (tag, entries) in &report.index_entries {
        println!("  {:<14} {}", tag, entries);
    }

    if report.dangling > 0 {
        println!(
            "\n{} index entr{} point at missing headers; run 'pkgdb rebuild' to drop them",
            report.dangling,
            if report.dangling == 1 { "y" } else { "ies" }
        );
    } else {
        println!("\nNo problems found");
    }

    Ok(())
}
