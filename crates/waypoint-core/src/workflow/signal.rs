//! Cooperative interruption for workflow runs.
//!
//! A [`RunSignal`] pairs a [`CancellationToken`] with a tagged interrupt so
//! the engine can tell a suspend request apart from a cancel request. Steps
//! never poll: blocking operations race against the token via
//! [`race_signal`] / [`wait_with_signal`] and unwind immediately when the
//! signal trips.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Interrupt
// ---------------------------------------------------------------------------

/// What an interrupted run should become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Checkpoint and park the run; it can be resumed later.
    Suspend,
    /// Terminate the run; it can never be resumed.
    Cancel,
}

/// A tagged interruption request, carried by the signal that tripped.
#[derive(Debug, Clone)]
pub struct Interrupt {
    pub kind: InterruptKind,
    pub reason: Option<String>,
}

impl Interrupt {
    pub fn suspend(reason: Option<String>) -> Self {
        Self {
            kind: InterruptKind::Suspend,
            reason,
        }
    }

    pub fn cancel(reason: Option<String>) -> Self {
        Self {
            kind: InterruptKind::Cancel,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// RunSignal
// ---------------------------------------------------------------------------

/// Shared interruption handle for one run.
///
/// Cloning is cheap and all clones observe the same state. Cancel wins over
/// suspend: a cancel request upgrades a pending suspend, while a suspend
/// request after a cancel is ignored, so a cancelled run never reports
/// itself suspended.
#[derive(Debug, Clone, Default)]
pub struct RunSignal {
    token: CancellationToken,
    interrupt: Arc<Mutex<Option<Interrupt>>>,
}

impl RunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request suspension. No-op if the run was already cancelled.
    pub fn suspend(&self, reason: Option<String>) {
        let mut slot = self.interrupt.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(i) if i.kind == InterruptKind::Cancel => return,
            Some(_) => return,
            None => *slot = Some(Interrupt::suspend(reason)),
        }
        drop(slot);
        self.token.cancel();
    }

    /// Request cancellation, upgrading any pending suspend.
    pub fn cancel(&self, reason: Option<String>) {
        let mut slot = self.interrupt.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(i) if i.kind == InterruptKind::Cancel => return,
            _ => *slot = Some(Interrupt::cancel(reason)),
        }
        drop(slot);
        self.token.cancel();
    }

    /// The pending interrupt, if the signal has tripped.
    pub fn interrupt(&self) -> Option<Interrupt> {
        self.interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal trips. Pending forever otherwise.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Returns the pending interrupt as an error, or `Ok` if untripped.
    pub fn check(&self) -> Result<(), Interrupt> {
        match self.interrupt() {
            Some(interrupt) => Err(interrupt),
            None => Ok(()),
        }
    }

    fn pending_or_suspend(&self) -> Interrupt {
        // The token can only trip through suspend()/cancel(), but if the
        // interrupt slot is somehow empty we treat it as a suspend so no
        // run is irrecoverably lost.
        self.interrupt().unwrap_or_else(|| Interrupt::suspend(None))
    }
}

// ---------------------------------------------------------------------------
// Cancellable-future primitives
// ---------------------------------------------------------------------------

/// Race a future against the run signal.
///
/// The future is dropped (and thereby cancelled at its next await point) if
/// the signal trips first.
pub async fn race_signal<F, T>(signal: &RunSignal, fut: F) -> Result<T, Interrupt>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = signal.triggered() => Err(signal.pending_or_suspend()),
        out = fut => Ok(out),
    }
}

/// Sleep for `duration` unless the signal trips first.
pub async fn wait_with_signal(signal: &RunSignal, duration: Duration) -> Result<(), Interrupt> {
    race_signal(signal, tokio::time::sleep(duration)).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_upgrades_pending_suspend() {
        let signal = RunSignal::new();
        signal.suspend(Some("waiting on approval".into()));
        signal.cancel(Some("operator abort".into()));

        let interrupt = signal.interrupt().unwrap();
        assert_eq!(interrupt.kind, InterruptKind::Cancel);
        assert_eq!(interrupt.reason.as_deref(), Some("operator abort"));
    }

    #[test]
    fn suspend_after_cancel_is_ignored() {
        let signal = RunSignal::new();
        signal.cancel(None);
        signal.suspend(Some("too late".into()));

        let interrupt = signal.interrupt().unwrap();
        assert_eq!(interrupt.kind, InterruptKind::Cancel);
    }

    #[test]
    fn first_suspend_reason_wins() {
        let signal = RunSignal::new();
        signal.suspend(Some("first".into()));
        signal.suspend(Some("second".into()));

        let interrupt = signal.interrupt().unwrap();
        assert_eq!(interrupt.reason.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn race_signal_interrupts_pending_future() {
        let signal = RunSignal::new();
        let racer = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            racer.cancel(Some("stop".into()));
        });

        let outcome = race_signal(&signal, std::future::pending::<()>()).await;
        let interrupt = outcome.unwrap_err();
        assert_eq!(interrupt.kind, InterruptKind::Cancel);
    }

    #[tokio::test]
    async fn wait_with_signal_completes_when_untripped() {
        let signal = RunSignal::new();
        wait_with_signal(&signal, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(!signal.is_triggered());
    }
}
