//! Deferred termination
//!
//! Signals are never acted on where they arrive. A listener thread only sets
//! an atomic flag; iterator advances and rebuild steps poll it and run the
//! cleanup (sync, then cut off every tracked database handle) synchronously.

use crate::db::DbInner;
use parking_lot::Mutex;
use pkgdb_core::{PkgdbError, Result, TerminateAction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static GLOBAL: OnceLock<TerminationController> = OnceLock::new();

struct ControllerInner {
    requested: AtomicBool,
    listening: AtomicBool,
    tracked: Mutex<Vec<Weak<DbInner>>>,
}

/// Termination flag plus the database handles to clean up when it is set.
///
/// Clones share state. Handles opened with [`Database::open`](crate::Database::open)
/// register with [`TerminationController::global`].
#[derive(Clone)]
pub struct TerminationController {
    inner: Arc<ControllerInner>,
}

impl TerminationController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                requested: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                tracked: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide controller.
    pub fn global() -> &'static TerminationController {
        GLOBAL.get_or_init(TerminationController::new)
    }

    /// Record a termination request. Safe to call from any thread.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Spawn the signal listener thread (once per controller).
    ///
    /// The thread waits for Ctrl-C, SIGTERM, SIGHUP or SIGQUIT and then sets
    /// the flag. It performs no cleanup itself.
    pub fn install_signal_listener(&self) -> Result<()> {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.inner.listening.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let controller = self.clone();
        let spawned = std::thread::Builder::new()
            .name("pkgdb-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    wait_for_signal().await;
                    controller.request();
                });
            });

        if let Err(e) = spawned {
            self.inner.listening.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        tracing::debug!("Installed termination signal listener");
        Ok(())
    }

    pub(crate) fn track(&self, db: &Arc<DbInner>) {
        let mut tracked = self.inner.tracked.lock();
        tracked.retain(|weak| weak.strong_count() > 0);
        tracked.push(Arc::downgrade(db));
    }

    /// Handles still alive and tracked by this controller.
    pub fn tracked_count(&self) -> usize {
        self.inner
            .tracked
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Run cleanup if `force` is set or termination was requested.
    ///
    /// Every tracked handle is synced and marked terminated; operations
    /// through it (and its iterators) then fail with `Terminated`. Returns
    /// whether cleanup ran.
    pub fn check_terminate(&self, force: bool) -> bool {
        if !force && !self.is_requested() {
            return false;
        }

        let handles: Vec<Weak<DbInner>> = std::mem::take(&mut *self.inner.tracked.lock());
        let mut closed = 0usize;
        for db in handles.iter().filter_map(Weak::upgrade) {
            if db.terminate() {
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!("Termination cleanup cut off {} database handle(s)", closed);
        }
        true
    }

    /// Iterator check point: clean up and apply `action` once termination
    /// was requested, otherwise return immediately.
    pub fn check_signals(&self, action: TerminateAction) -> Result<()> {
        if !self.is_requested() {
            return Ok(());
        }
        self.check_terminate(false);

        match action {
            TerminateAction::Exit(code) => {
                tracing::warn!("Exiting on termination request (status {})", code);
                std::process::exit(code)
            }
            TerminateAction::Error => Err(PkgdbError::Terminated),
        }
    }
}

impl Default for TerminationController {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let other = async {
        use tokio::signal::unix::{signal, SignalKind};

        let streams = [
            SignalKind::terminate(),
            SignalKind::hangup(),
            SignalKind::quit(),
        ]
        .into_iter()
        .filter_map(|kind| match signal(kind) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("Signal handler unavailable: {}", e);
                None
            }
        })
        .collect::<Vec<_>>();

        let [mut term, mut hup, mut quit]: [_; 3] = match streams.try_into() {
            Ok(streams) => streams,
            Err(_) => return std::future::pending::<()>().await,
        };

        tokio::select! {
            _ = term.recv() => tracing::info!("Received SIGTERM, requesting termination"),
            _ = hup.recv() => tracing::info!("Received SIGHUP, requesting termination"),
            _ = quit.recv() => tracing::info!("Received SIGQUIT, requesting termination"),
        }
    };

    #[cfg(not(unix))]
    let other = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, requesting termination"),
        _ = other => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_controller_is_noop() {
        let controller = TerminationController::new();
        assert!(!controller.check_terminate(false));
        assert!(controller.check_signals(TerminateAction::Error).is_ok());
    }

    #[test]
    fn test_force_runs_cleanup() {
        let controller = TerminationController::new();
        assert!(controller.check_terminate(true));
        assert!(!controller.is_requested());
    }

    #[test]
    fn test_request_is_shared_between_clones() {
        let controller = TerminationController::new();
        let handle = controller.clone();
        handle.request();
        assert!(controller.is_requested());
        assert!(matches!(
            controller.check_signals(TerminateAction::Error),
            Err(PkgdbError::Terminated)
        ));
    }

    #[test]
    fn test_listener_installs_once() {
        let controller = TerminationController::new();
        controller.install_signal_listener().unwrap();
        controller.install_signal_listener().unwrap();
        assert!(!controller.is_requested());
    }
}
