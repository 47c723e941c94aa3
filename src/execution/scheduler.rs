//! Execution scheduler - bounds how many job instances run at once

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling job instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time, in expansion order
    Sequential,

    /// Every instance at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Concurrency cap, or `None` when unbounded
    pub fn max_concurrent(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(max) => Some((*max).max(1)),
        }
    }
}

/// Hands out run slots according to a [`SchedulingStrategy`]
///
/// Slots are acquired in request order, so instances start in expansion
/// order even when capped.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    strategy: SchedulingStrategy,
    slots: Option<Arc<Semaphore>>,
}

impl JobScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            slots: strategy
                .max_concurrent()
                .map(|max| Arc::new(Semaphore::new(max))),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Wait for a free slot; the slot is released when the permit drops
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.slots {
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Slots currently free, or `None` when unbounded
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|s| s.available_permits())
    }
}
