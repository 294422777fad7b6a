//! Read-only consistency check.

use crate::db::Database;
use crate::termination::TerminationController;
use pkgdb_core::{
    DbConfig, Header, InstanceNumber, KeyedStore, OpenMode, PkgdbError, Result, Tag,
};
use pkgdb_lmdb::{decode_index_value, key_to_instance, COUNTER_KEY};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// What a successful verify found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub records: u64,
    pub next_instance: Option<InstanceNumber>,
    /// Entries per index, keyed by tag name.
    pub index_entries: BTreeMap<String, u64>,
    /// Index entries naming an instance with no header.
    pub dangling: u64,
}

/// Scan every store of the database without writing to it.
///
/// Structural problems (malformed keys or values, undecodable headers, a
/// counter not above every instance) fail with `Corruption`. Dangling index
/// entries are logged and counted but tolerated.
pub fn verify(config: &DbConfig) -> Result<VerifyReport> {
    let path = config.data_file();
    let config = config.clone().with_mode(OpenMode::read_only());
    let db = Database::open_with_controller(config, &TerminationController::new())?;
    let report = scan(&db);
    db.close()?;

    let report = report?;
    tracing::info!(
        "Verified {}: {} headers, {} dangling index entries",
        path.display(),
        report.records,
        report.dangling
    );
    Ok(report)
}

fn scan(db: &Database) -> Result<VerifyReport> {
    let inner = db.inner();
    let store = inner.store();
    let mut report = VerifyReport::default();
    let mut instances = HashSet::new();
    let mut max_instance: InstanceNumber = 0;

    inner.for_each_primary(&mut |key, value| {
        let instance = key_to_instance(key).ok_or_else(|| {
            PkgdbError::Corruption(format!("primary key of {} bytes", key.len()))
        })?;
        if key == COUNTER_KEY {
            let next = key_to_instance(value).ok_or_else(|| {
                PkgdbError::Corruption(format!("instance counter of {} bytes", value.len()))
            })?;
            report.next_instance = Some(next);
            return Ok(());
        }

        Header::from_blob(value).map_err(|e| {
            PkgdbError::Corruption(format!("header #{instance} does not decode: {e}"))
        })?;
        instances.insert(instance);
        max_instance = max_instance.max(instance);
        report.records += 1;
        Ok(())
    })?;

    if report.records > 0 {
        match report.next_instance {
            Some(next) if next > max_instance => {}
            Some(next) => {
                return Err(PkgdbError::Corruption(format!(
                    "instance counter {next} does not exceed header #{max_instance}"
                )))
            }
            None => {
                return Err(PkgdbError::Corruption(
                    "headers present but no instance counter".to_string(),
                ))
            }
        }
    }

    for tag in Tag::INDEXED {
        let index = match inner.index_store(tag) {
            Ok(index) => index,
            Err(PkgdbError::NotFound(_)) => {
                tracing::debug!("No {} index present", tag);
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut entries = 0u64;
        store.for_each(index, &mut |key, value| {
            let entry = decode_index_value(value).ok_or_else(|| {
                PkgdbError::Corruption(format!("{tag} index value of {} bytes", value.len()))
            })?;
            if !instances.contains(&entry.instance) {
                tracing::warn!(
                    "{} index entry {:?} points at missing header #{}",
                    tag,
                    String::from_utf8_lossy(key),
                    entry.instance
                );
                report.dangling += 1;
            }
            entries += 1;
            Ok(())
        })?;
        report.index_entries.insert(tag.name().to_string(), entries);
    }

    Ok(report)
}
