//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is threaded explicitly through every pipeline
//! stage and task closure; there is no ambient global state, so tests can
//! simulate cancellation deterministically. Cancellation is cooperative:
//! tasks poll the token (or sleep through it) and abort early, nothing is
//! terminated forcibly.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Why a token was cancelled. The reason travels with the cancellation so
/// the pipeline can report a global timeout distinctly from a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A task in the owning run returned an error.
    TaskFailed,
    /// The global wall-clock timeout expired.
    Timeout,
    /// The user interrupted the process (SIGINT/SIGTERM).
    Interrupted,
}

#[derive(Default)]
struct TokenInner {
    state: Mutex<Option<CancelReason>>,
    cv: Condvar,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn cancel(&self, reason: CancelReason) {
        {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.is_some() {
                return;
            }
            *state = Some(reason);
        }
        self.cv.notify_all();

        let children = match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for child in children.iter() {
            if let Some(child) = child.upgrade() {
                child.cancel(reason);
            }
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// A clonable cancellation handle shared by all tasks of a run.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<TokenInner>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every child derived from it. The first reason
    /// wins; later cancellations are no-ops.
    pub fn cancel(&self, reason: CancelReason) {
        self.0.cancel(reason);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.0.reason()
    }

    /// Derive a child token. Cancelling the parent cancels the child;
    /// cancelling the child leaves the parent (and sibling runs) alone.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        if let Some(reason) = self.reason() {
            child.cancel(reason);
            return child;
        }
        let mut children = match self.0.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        children.push(Arc::downgrade(&child.0));
        // A cancel may have slipped in between the check and the insert.
        if let Some(reason) = self.reason() {
            child.cancel(reason);
        }
        children.retain(|w| w.strong_count() > 0);
        drop(children);
        child
    }

    /// Sleep for `duration` or until the token is cancelled, whichever
    /// comes first. Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let state = match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (state, _timeout) = match self
            .0
            .cv
            .wait_timeout_while(state, duration, |cancelled| cancelled.is_none())
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.is_none()
    }
}

/// Cancel the token with [`CancelReason::Interrupted`] on SIGINT/SIGTERM.
pub fn cancel_on_interrupt(token: &CancellationToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("shipwright: interrupted, cancelling...");
        token.cancel(CancelReason::Interrupted);
    })
}

/// Cancel the token with [`CancelReason::Timeout`] once `timeout` elapses.
/// The watchdog observes earlier cancellation and exits quietly.
pub fn cancel_after(token: &CancellationToken, timeout: Duration) {
    let token = token.clone();
    std::thread::spawn(move || {
        if token.sleep(timeout) {
            token.cancel(CancelReason::Timeout);
        }
    });
}
