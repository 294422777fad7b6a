//! Rebuild engine
//!
//! Rebuild copies every header of the primary store, in ascending instance
//! order, into a shadow environment next to the data file, re-deriving all
//! index entries on the way. The shadow replaces the data file with a single
//! `rename`, so readers see either the old database or the complete new one.
//! Any failure before the rename deletes the shadow and leaves the original
//! file untouched.

use crate::db::Database;
use crate::termination::TerminationController;
use chrono::{DateTime, Utc};
use pkgdb_core::{
    observe, DbConfig, DbOp, Header, HeaderValidator, InstanceNumber, OpStats, OpenMode,
    PkgdbError, Result, Tag, Verdict, WriteBatch,
};
use pkgdb_lmdb::{lock_path, remove_env_files, LmdbOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Summary of a completed rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub started_at: DateTime<Utc>,
    pub records: u64,
    /// Counter value written to the new database.
    pub next_instance: InstanceNumber,
    pub elapsed: Duration,
    /// Primary-store reads from the old database.
    pub gets: OpStats,
    /// Write transactions committed to the shadow database.
    pub puts: OpStats,
}

struct CopyStats {
    records: u64,
    next_instance: InstanceNumber,
    gets: OpStats,
    puts: OpStats,
}

/// Shadow data file for a rebuild run by this process.
pub fn shadow_path(data_file: &Path) -> PathBuf {
    let mut name = data_file.as_os_str().to_os_string();
    name.push(format!(".rebuild-{}", std::process::id()));
    PathBuf::from(name)
}

/// Rebuild the database described by `config`.
///
/// `validator` sees every header blob; a rejection aborts the rebuild with
/// `Integrity`. `controller` is polled once per record: a termination
/// request aborts with `Terminated`. Either way the original database is
/// left as it was.
pub fn rebuild(
    config: &DbConfig,
    validator: Option<&dyn HeaderValidator>,
    controller: &TerminationController,
) -> Result<RebuildReport> {
    let started_at = Utc::now();
    let start = Instant::now();

    let data_file = config.data_file();
    if !data_file.exists() {
        return Err(PkgdbError::NotFound(data_file.display().to_string()));
    }

    let shadow = shadow_path(&data_file);
    remove_env_files(&shadow)?;
    tracing::info!(
        "Rebuilding {} via {}",
        data_file.display(),
        shadow.display()
    );

    let stats = match copy_into_shadow(config, &data_file, &shadow, validator, controller) {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Rebuild of {} aborted: {}", data_file.display(), e);
            discard_shadow(&shadow);
            observe::record_rebuild(start.elapsed(), 0, false);
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&shadow, &data_file) {
        tracing::error!("Could not install rebuilt database: {}", e);
        discard_shadow(&shadow);
        observe::record_rebuild(start.elapsed(), stats.records, false);
        return Err(PkgdbError::Rebuild(format!(
            "rename {} -> {}: {}",
            shadow.display(),
            data_file.display(),
            e
        )));
    }
    if let Err(e) = std::fs::remove_file(lock_path(&shadow)) {
        tracing::warn!("Leftover shadow lock file: {}", e);
    }

    let elapsed = start.elapsed();
    observe::record_rebuild(elapsed, stats.records, true);
    tracing::info!(
        "Rebuilt {}: {} headers in {:?}",
        data_file.display(),
        stats.records,
        elapsed
    );

    Ok(RebuildReport {
        started_at,
        records: stats.records,
        next_instance: stats.next_instance,
        elapsed,
        gets: stats.gets,
        puts: stats.puts,
    })
}

fn discard_shadow(shadow: &Path) {
    if let Err(e) = remove_env_files(shadow) {
        tracing::warn!("Could not remove shadow {}: {}", shadow.display(), e);
    }
}

/// Fill the shadow database. Every handle is closed again on return.
fn copy_into_shadow(
    config: &DbConfig,
    data_file: &Path,
    shadow: &Path,
    validator: Option<&dyn HeaderValidator>,
    controller: &TerminationController,
) -> Result<CopyStats> {
    let old_config = config.clone().with_mode(OpenMode::read_only());
    let old = Database::open_file(
        old_config.clone(),
        data_file.to_path_buf(),
        &LmdbOptions::from_config(&old_config),
        controller,
    )?;
    let new = Database::open_file(
        config.clone(),
        shadow.to_path_buf(),
        &LmdbOptions::scratch(config),
        controller,
    )?;
    new.open_all()?;

    let batch_size = config.rebuild_batch_size.max(1) as u64;
    let mut batch = WriteBatch::new();
    let mut records = 0u64;
    let mut max_instance: InstanceNumber = 0;

    let mut keys = old.key_iter(Tag::Packages)?;
    while keys.step()? {
        if controller.check_terminate(false) {
            return Err(PkgdbError::Terminated);
        }

        let Some(instance) = keys.instance() else {
            return Err(PkgdbError::Corruption(format!(
                "primary key of {} bytes",
                keys.key_size()
            )));
        };
        let Some(blob) = old.inner().fetch(instance)? else {
            continue;
        };

        if let Some(validator) = validator {
            match validator.validate(&blob) {
                Verdict::Accept => {}
                Verdict::Note(message) => tracing::warn!("Header #{}: {}", instance, message),
                Verdict::Reject(message) => {
                    return Err(PkgdbError::Integrity {
                        offset: instance,
                        message,
                    })
                }
            }
        }

        let header = Header::from_blob(&blob).map_err(|e| PkgdbError::Integrity {
            offset: instance,
            message: format!("header does not decode: {e}"),
        })?;
        new.inner().stage_record(&mut batch, instance, &blob, &header)?;
        records += 1;
        max_instance = max_instance.max(instance);

        if records % batch_size == 0 {
            new.inner().commit(&mut batch, DbOp::Put)?;
            tracing::debug!("Rebuild progress: {} headers copied", records);
        }
    }
    drop(keys);

    // Keep the old counter unless it fell behind the copied instances
    let next_instance = old.inner().next_instance()?.max(max_instance.saturating_add(1));
    new.inner().stage_counter(&mut batch, next_instance);
    new.inner().commit(&mut batch, DbOp::Put)?;
    new.sync()?;

    let stats = CopyStats {
        records,
        next_instance,
        gets: old.op(DbOp::Get),
        puts: new.op(DbOp::Put),
    };
    old.close()?;
    new.close()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_path_is_sibling() {
        let data = Path::new("/var/lib/pkgdb/packages.mdb");
        let shadow = shadow_path(data);
        assert_eq!(shadow.parent(), data.parent());
        assert!(shadow
            .to_string_lossy()
            .ends_with(&format!("packages.mdb.rebuild-{}", std::process::id())));
    }
}
