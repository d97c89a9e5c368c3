//! Pollable maintenance targets and cancellable jobs.
//!
//! The external scheduler (or the bundled [`crate::maintainer::executor`])
//! does not know about flushes or fusions. It polls [`MaintenanceTarget`]s
//! for need and urgency, asks a needy target to prepare a job, and runs the
//! job on a worker with a shared [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::maintainer::IndexMaintainer;

/// Cooperative stop signal shared between the owner and running jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Result of polling a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceNeed {
    /// The target has work to do.
    pub needed: bool,
    /// The work should preempt routine maintenance.
    pub urgent: bool,
}

impl MaintenanceNeed {
    /// No work pending.
    pub fn none() -> Self {
        MaintenanceNeed::default()
    }

    /// Work pending with the given urgency.
    pub fn needed(urgent: bool) -> Self {
        MaintenanceNeed {
            needed: true,
            urgent,
        }
    }
}

/// A prepared, cancellable unit of maintenance work.
pub trait MaintenanceJob: Send {
    /// Execute the job. Cancellation and I/O failures leave durable state
    /// valid; the target reports the work as still needed on later polls.
    fn run(self: Box<Self>, cancel: &CancelToken) -> Result<()>;

    /// Short human-readable description for logging.
    fn describe(&self) -> String;
}

/// A source of maintenance work the scheduler can poll.
pub trait MaintenanceTarget: Send + Sync {
    /// Target name for logging.
    fn name(&self) -> &str;

    /// Check whether the target currently needs to run.
    fn poll(&self) -> MaintenanceNeed;

    /// Prepare one unit of work. Returns `None` when there is nothing to
    /// do after all (e.g. an empty flush was skipped) or a job of this
    /// kind is already in progress.
    fn prepare(&self) -> Result<Option<Box<dyn MaintenanceJob>>>;
}

/// Adapter exposing the maintainer's flush machine to the scheduler.
pub struct FlushTarget {
    maintainer: Arc<IndexMaintainer>,
}

impl FlushTarget {
    /// Create a flush target for `maintainer`.
    pub fn new(maintainer: Arc<IndexMaintainer>) -> Self {
        FlushTarget { maintainer }
    }
}

impl MaintenanceTarget for FlushTarget {
    fn name(&self) -> &str {
        "flush"
    }

    fn poll(&self) -> MaintenanceNeed {
        self.maintainer.needs_flush()
    }

    fn prepare(&self) -> Result<Option<Box<dyn MaintenanceJob>>> {
        let job = self.maintainer.init_flush(self.maintainer.current_serial())?;
        Ok(job.map(|job| Box::new(job) as Box<dyn MaintenanceJob>))
    }
}

/// Adapter exposing the maintainer's fusion machine to the scheduler.
pub struct FusionTarget {
    maintainer: Arc<IndexMaintainer>,
}

impl FusionTarget {
    /// Create a fusion target for `maintainer`.
    pub fn new(maintainer: Arc<IndexMaintainer>) -> Self {
        FusionTarget { maintainer }
    }
}

impl MaintenanceTarget for FusionTarget {
    fn name(&self) -> &str {
        "fusion"
    }

    fn poll(&self) -> MaintenanceNeed {
        self.maintainer.needs_fusion()
    }

    fn prepare(&self) -> Result<Option<Box<dyn MaintenanceJob>>> {
        let job = self.maintainer.init_fusion()?;
        Ok(job.map(|job| Box::new(job) as Box<dyn MaintenanceJob>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_need_constructors() {
        assert_eq!(
            MaintenanceNeed::none(),
            MaintenanceNeed {
                needed: false,
                urgent: false
            }
        );
        assert!(MaintenanceNeed::needed(true).urgent);
        assert!(MaintenanceNeed::needed(false).needed);
    }
}
