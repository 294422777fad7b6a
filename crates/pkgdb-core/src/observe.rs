//! Optional metrics instrumentation for pkgdb.
//!
//! When the `observe` feature is enabled, store operations, iterator steps and
//! rebuilds emit counters and histograms via the [`metrics`] crate. A
//! downstream application must install a metrics recorder to collect them.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record one primary-store operation.
///
/// - `pkgdb.store.ops_total` – counter with `op` label (`get` / `put` / `delete`)
/// - `pkgdb.store.op_duration_seconds` – histogram with `op` label
#[inline]
pub fn record_store_op(op: &'static str, duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("pkgdb.store.ops_total", "op" => op).increment(1);
        metrics::histogram!("pkgdb.store.op_duration_seconds", "op" => op)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (op, duration);
    }
}

/// Record a header skipped by an iterator.
///
/// - `pkgdb.iterator.skipped_total` – counter with `reason` label (`stale` / `filtered`)
#[inline]
pub fn record_skip(reason: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("pkgdb.iterator.skipped_total", "reason" => reason).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = reason;
    }
}

/// Record a rebuild attempt.
///
/// - `pkgdb.rebuild.total` – counter with `outcome` label
/// - `pkgdb.rebuild.duration_seconds` – histogram
/// - `pkgdb.rebuild.records_total` – counter
#[inline]
pub fn record_rebuild(duration: std::time::Duration, records: u64, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("pkgdb.rebuild.total", "outcome" => outcome).increment(1);
        metrics::histogram!("pkgdb.rebuild.duration_seconds").record(duration.as_secs_f64());
        metrics::counter!("pkgdb.rebuild.records_total").increment(records);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, records, success);
    }
}
