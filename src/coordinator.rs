// src/coordinator.rs

//! The reload coordinator.
//!
//! Every inbound request calls [`ReloadCoordinator::ensure_fresh`]. A call
//! fingerprints the source tree and, depending on what it finds, does
//! nothing, restarts the backend, or runs a full stop → build → start →
//! ready cycle.
//!
//! Concurrent calls are collapsed into one cycle: the first caller launches
//! it, everybody who arrives while it runs joins it, and all of them get the
//! same result. The cycle runs in its own task, so a caller going away (e.g.
//! a client disconnecting mid-build) never leaves a half-restarted backend.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::RefreshError;
use crate::exec::ProcessRunner;
use crate::fingerprint::{Fingerprint, TreeFingerprinter};
use crate::probe::ReadinessProbe;
use crate::types::RefreshOutcome;

pub type RefreshResult = Result<RefreshOutcome, RefreshError>;

type InFlight = watch::Receiver<Option<RefreshResult>>;

/// State only touched from inside a cycle.
struct CoordinatorState<R> {
    fingerprinter: TreeFingerprinter,
    runner: R,
    probe: ReadinessProbe,
    /// Fingerprint of the tree the running backend was built from. Only
    /// advanced after the backend was seen accepting connections.
    last_good: Option<Fingerprint>,
}

/// Serialises reload cycles and fans their results out to all callers.
///
/// Cloning is cheap; clones share the same backend and state.
pub struct ReloadCoordinator<R> {
    state: Arc<tokio::sync::Mutex<CoordinatorState<R>>>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl<R> Clone for ReloadCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R: ProcessRunner + 'static> ReloadCoordinator<R> {
    pub fn new(fingerprinter: TreeFingerprinter, runner: R, probe: ReadinessProbe) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(CoordinatorState {
                fingerprinter,
                runner,
                probe,
                last_good: None,
            })),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Make sure the backend is built from the current sources and accepting
    /// connections.
    ///
    /// If a cycle is already running, waits for it and returns its result
    /// instead of starting another one.
    pub async fn ensure_fresh(&self) -> RefreshResult {
        let mut rx = self.join_or_launch();
        match rx.wait_for(Option::is_some).await {
            Ok(result) => result
                .clone()
                .unwrap_or_else(|| Err(RefreshError::Aborted("missing cycle result".to_string()))),
            Err(_) => Err(RefreshError::Aborted(
                "reload cycle ended without a result".to_string(),
            )),
        }
    }

    /// Fingerprint the backend is currently known to be built from.
    pub async fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.state.lock().await.last_good
    }

    /// Stop the backend. Waits for a running cycle to finish first.
    pub async fn shutdown(&self) -> bool {
        let mut state = self.state.lock().await;
        let stopped = state.runner.stop().await;
        if stopped {
            info!("backend stopped on shutdown");
        }
        stopped
    }

    fn join_or_launch(&self) -> InFlight {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = slot.as_ref() {
            debug!("joining in-flight reload cycle");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let state = Arc::clone(&self.state);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let cycle = tokio::spawn(async move { state.lock().await.refresh().await });
            let result = cycle
                .await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())));

            // Clear before publishing: whoever calls after this point must
            // run a new cycle rather than reuse this result.
            in_flight.lock().unwrap_or_else(PoisonError::into_inner).take();
            let _ = tx.send(Some(result));
        });

        rx
    }
}

impl<R: ProcessRunner> CoordinatorState<R> {
    async fn refresh(&mut self) -> RefreshResult {
        let current = self.fingerprinter.fingerprint_async().await.inspect_err(|e| {
            warn!(error = %e, "could not fingerprint source tree");
        })?;

        if self.last_good == Some(current) {
            if self.runner.is_running() {
                debug!(fingerprint = %current.short(), "sources unchanged; backend up");
                return Ok(RefreshOutcome::Unchanged);
            }

            info!(fingerprint = %current.short(), "backend not running; restarting without rebuild");
            self.start_and_wait().await?;
            return Ok(RefreshOutcome::Restarted);
        }

        info!(
            fingerprint = %current.short(),
            previous = ?self.last_good.map(|f| f.short()),
            "change detected, rebuilding"
        );

        let t = Instant::now();
        if self.runner.stop().await {
            info!(elapsed_ms = t.elapsed().as_millis() as u64, "stopped backend");
        }

        let t = Instant::now();
        if let Err(e) = self.runner.build().await {
            warn!(
                kind = e.kind(),
                elapsed_ms = t.elapsed().as_millis() as u64,
                "build failed; keeping previous fingerprint"
            );
            return Err(e);
        }
        info!(elapsed_ms = t.elapsed().as_millis() as u64, "rebuilt");

        self.start_and_wait().await?;
        self.last_good = Some(current);
        Ok(RefreshOutcome::Rebuilt)
    }

    /// Start the backend and block until it accepts connections.
    ///
    /// If it exits first, or the probe times out, the backend is stopped and
    /// the cycle fails.
    async fn start_and_wait(&mut self) -> Result<(), RefreshError> {
        self.runner.start().await?;

        let t = Instant::now();
        let ready = tokio::select! {
            ready = self.probe.wait_ready() => ready,
            diagnostics = self.runner.exited() => Err(RefreshError::Start(diagnostics)),
        };

        match ready {
            Ok(()) => {
                info!(
                    addr = %self.probe.addr(),
                    elapsed_ms = t.elapsed().as_millis() as u64,
                    "backend ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(kind = e.kind(), addr = %self.probe.addr(), "backend did not become ready");
                self.runner.stop().await;
                Err(e)
            }
        }
    }
}
