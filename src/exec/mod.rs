//! Pull-based execution: logical plans compile into operator trees that are
//! polled for batches of rows. Source round trips happen at Access
//! boundaries through registered connectors; dependent joins stage their
//! sub-plans here.

pub mod compiler;
pub mod context;
pub mod dependent;
pub mod display;
pub mod expr;
pub mod query;
pub mod source;
pub mod workers;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::types::Value;
use crate::error::{Error, Result};
use crate::plan::schema::PlanSchema;

pub use compiler::build;
pub use context::{CancelToken, ExecContext};
pub use display::ResultSet;
pub use source::{Connector, ConnectorRegistry, MemoryConnector, RowStream};
pub use workers::WorkerPool;

pub type Row = Vec<Value>;

/// Result of polling an operator once.
#[derive(Debug)]
pub enum ExecPoll {
    /// A batch of rows is ready. May be empty; an empty batch is a polite
    /// "keep polling", not end of stream.
    Batch(Vec<Row>),
    /// Nothing ready yet. The caller polls again later; this is a
    /// legitimate response, not an error, so a stalled source never blocks
    /// a sibling plan.
    Pending,
    /// The operator is exhausted.
    Done,
}

/// A runtime operator. Operators are driven by repeated `poll` calls from
/// their parent and keep their own state internally; `init` runs once
/// before the first poll, top-down.
pub trait ExecutionPlan {
    fn as_any(&self) -> &dyn Any;

    fn schema(&self) -> &PlanSchema;

    fn init(&self, ctx: &ExecContext) -> Result<()>;

    fn poll(&self, ctx: &ExecContext) -> Result<ExecPoll>;

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>>;
}

/// Drive an operator tree to completion and collect the full result.
///
/// `Pending` responses back off briefly before the next poll; cancellation
/// is checked between polls so a parked query can still be aborted.
pub fn execute(plan: &Arc<dyn ExecutionPlan>, ctx: &ExecContext) -> Result<ResultSet> {
    plan.init(ctx)?;
    let mut rows = Vec::new();
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::cancelled("query cancelled"));
        }
        match plan.poll(ctx)? {
            ExecPoll::Batch(batch) => rows.extend(batch),
            ExecPoll::Pending => std::thread::sleep(Duration::from_millis(1)),
            ExecPoll::Done => break,
        }
    }
    Ok(ResultSet::new(plan.schema().clone(), rows))
}
