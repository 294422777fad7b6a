use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::observe;

/// Primary-store operation kinds tracked per database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbOp {
    Get,
    Put,
    Delete,
}

impl DbOp {
    pub const ALL: [DbOp; 3] = [DbOp::Get, DbOp::Put, DbOp::Delete];

    fn slot(self) -> usize {
        match self {
            DbOp::Get => 0,
            DbOp::Put => 1,
            DbOp::Delete => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DbOp::Get => "get",
            DbOp::Put => "put",
            DbOp::Delete => "delete",
        }
    }
}

/// Snapshot of one operation counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStats {
    pub count: u64,
    pub elapsed: Duration,
}

/// Invocation count and cumulative elapsed time per [`DbOp`].
#[derive(Debug, Default)]
pub struct OpCounters {
    counts: [AtomicU64; 3],
    nanos: [AtomicU64; 3],
}

impl OpCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: DbOp, elapsed: Duration) {
        let slot = op.slot();
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos[slot].fetch_add(nanos, Ordering::Relaxed);
        observe::record_store_op(op.as_str(), elapsed);
    }

    /// Run `f`, charging its wall time to `op`.
    pub fn time<T>(&self, op: DbOp, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(op, start.elapsed());
        out
    }

    pub fn get(&self, op: DbOp) -> OpStats {
        let slot = op.slot();
        OpStats {
            count: self.counts[slot].load(Ordering::Relaxed),
            elapsed: Duration::from_nanos(self.nanos[slot].load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_kind() {
        let ops = OpCounters::new();
        ops.record(DbOp::Get, Duration::from_micros(5));
        ops.record(DbOp::Get, Duration::from_micros(7));
        ops.record(DbOp::Delete, Duration::from_micros(1));

        let get = ops.get(DbOp::Get);
        assert_eq!(get.count, 2);
        assert_eq!(get.elapsed, Duration::from_micros(12));
        assert_eq!(ops.get(DbOp::Put), OpStats::default());
        assert_eq!(ops.get(DbOp::Delete).count, 1);
    }

    #[test]
    fn test_time_returns_closure_value() {
        let ops = OpCounters::new();
        let v = ops.time(DbOp::Put, || 41 + 1);
        assert_eq!(v, 42);
        assert_eq!(ops.get(DbOp::Put).count, 1);
    }
}
