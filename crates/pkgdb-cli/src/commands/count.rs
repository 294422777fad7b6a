//! Count command implementation

use anyhow::{Context, Result};
use pkgdb::prelude::*;

pub fn execute(config: DbConfig, name: &str) -> Result<()> {
    let db = Database::open(config).context("Failed to open database")?;
    let count = db.count_packages(name)?;
    db.close()?;
    println!("{}", count);
    Ok(())
}
