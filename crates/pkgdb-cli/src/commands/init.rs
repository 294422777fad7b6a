//! Init command implementation

use anyhow::{Context, Result};
use pkgdb::prelude::*;

pub fn execute(config: DbConfig) -> Result<()> {
    let path = config.data_file();
    Database::init(&config)
        .with_context(|| format!("Failed to initialize {}", path.display()))?;
    println!("Initialized empty package database at {}", path.display());
    Ok(())
}
