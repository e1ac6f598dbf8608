use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::exec::source::ConnectorRegistry;
use crate::exec::workers::WorkerPool;

/// Cooperative cancellation flag shared by every operator of a query.
/// Operators check it at each poll and worker jobs check it between
/// batches, so cancelling aborts outstanding sub-plans promptly instead of
/// letting them run to completion.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-query execution context. Everything an operator needs at runtime is
/// threaded through here explicitly; there is no ambient state.
#[derive(Clone)]
pub struct ExecContext {
    /// Max rows an operator hands upward per poll.
    pub vector_size: usize,
    /// Deadline applied to each sub-plan execution, independent harvests
    /// and dependent batches alike.
    pub subplan_timeout: Duration,
    pub cancel: CancelToken,
    pub pool: Arc<WorkerPool>,
    pub connectors: Arc<ConnectorRegistry>,
}

impl ExecContext {
    pub fn new(config: &Config, connectors: Arc<ConnectorRegistry>) -> Self {
        Self {
            vector_size: config.vector_size,
            subplan_timeout: Duration::from_millis(config.subplan_timeout_ms),
            cancel: CancelToken::new(),
            pool: Arc::new(WorkerPool::new(config.workers)),
            connectors,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.subplan_timeout = timeout;
        self
    }
}
