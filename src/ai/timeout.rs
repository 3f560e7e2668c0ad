//! Deadline and Cancellation Helpers
//!
//! Every suspension point of a dispatch (the adapter call and the backoff
//! sleep) races the caller's cancellation token and overall deadline.
//!
//! ## Usage
//!
//! ```ignore
//! let deadline = Deadline::after(Duration::from_secs(30));
//! match guarded(adapter.generate(&request), &cancel, deadline).await {
//!     Ok(result) => { /* call finished */ }
//!     Err(Interrupted::Cancelled) => { /* caller gave up */ }
//!     Err(Interrupted::DeadlineElapsed) => { /* out of time */ }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Optional point in time after which no more work may start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn from_option(instant: Option<Instant>) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Whether waiting `delay` from now still ends before the deadline
    pub fn admits(&self, delay: Duration) -> bool {
        self.0
            .is_none_or(|deadline| Instant::now() + delay <= deadline)
    }

    /// Resolves when the deadline passes; never resolves when unbounded
    pub async fn expired(&self) {
        match self.0 {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Why a guarded future stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineElapsed,
}

/// Run `future` unless the token fires or the deadline passes first
///
/// Cancellation is checked before the future; a future that is ready at the
/// same instant the deadline passes still wins.
pub async fn guarded<F: Future>(
    future: F,
    cancel: &CancellationToken,
    deadline: Deadline,
) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        output = future => Ok(output),
        _ = deadline.expired() => Err(Interrupted::DeadlineElapsed),
    }
}
