//! Call Context Module
//!
//! Every plugin call and every core operation takes a [`Context`]. It carries
//! the caller's cancellation token, an optional deadline, and the atomic group
//! (database transaction) the call belongs to, if any.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies one in-flight atomic group inside a database backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancellation, deadline and atomic-group scope for a single call chain
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    group: Option<GroupId>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled through the given token
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Returns a copy of this context that expires after `timeout`.
    /// An earlier deadline already on the context wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            ..self.clone()
        }
    }

    /// Returns a copy of this context scoped to an atomic group
    pub fn with_group(&self, group: GroupId) -> Self {
        Self {
            group: Some(group),
            ..self.clone()
        }
    }

    /// The atomic group this call runs in, if any
    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Fails fast when the context is already cancelled or past its deadline
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    ///
    /// When the context wins the race the future is dropped, so any work it
    /// had in flight is abandoned.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = wait_deadline(self.deadline) => Err(Error::DeadlineExceeded),
            res = fut => res,
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
