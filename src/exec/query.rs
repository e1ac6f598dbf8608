use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::capability::SourceId;
use crate::error::{Error, Result};
use crate::exec::expr::{is_true, PhysicalExpr};
use crate::exec::source::RowStream;
use crate::exec::{ExecContext, ExecPoll, ExecutionPlan, Row};
use crate::plan::node::Plan;
use crate::plan::schema::PlanSchema;

/// Executes one Access node: hands the pushed subtree to the source's
/// connector and pulls the resulting stream in vector-size batches. The
/// round trip starts lazily on the first poll and carries its own deadline,
/// which is the unit of timeout enforcement for sub-plan executions.
pub struct AccessExec {
    source: SourceId,
    subtree: Arc<Plan>,
    schema: PlanSchema,
    stream: RefCell<Option<RowStream>>,
    deadline: Cell<Option<Instant>>,
}

impl AccessExec {
    pub fn new(source: SourceId, subtree: Arc<Plan>) -> Self {
        let schema = subtree.schema().clone();
        Self { source, subtree, schema, stream: RefCell::new(None), deadline: Cell::new(None) }
    }
}

impl ExecutionPlan for AccessExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> &PlanSchema {
        &self.schema
    }

    fn init(&self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }

    fn poll(&self, ctx: &ExecContext) -> Result<ExecPoll> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::cancelled(format!("access to {} cancelled", self.source)));
        }
        let mut stream = self.stream.borrow_mut();
        if stream.is_none() {
            if !ctx.subplan_timeout.is_zero() {
                self.deadline.set(Some(Instant::now() + ctx.subplan_timeout));
            }
            let connector = ctx.connectors.get(&self.source)?;
            *stream = Some(connector.execute(&self.subtree)?);
        }
        if let Some(deadline) = self.deadline.get() {
            if Instant::now() > deadline {
                return Err(Error::timeout(format!(
                    "source {} exceeded {:?}",
                    self.source, ctx.subplan_timeout
                )));
            }
        }
        let iter = match stream.as_mut() {
            Some(iter) => iter,
            None => return Ok(ExecPoll::Done),
        };
        let mut rows = Vec::with_capacity(ctx.vector_size);
        for item in iter.by_ref().take(ctx.vector_size) {
            rows.push(item?);
        }
        if rows.is_empty() {
            return Ok(ExecPoll::Done);
        }
        Ok(ExecPoll::Batch(rows))
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }
}

/// Engine-side filter for predicates the source could not take.
pub struct FilterExec {
    input: Arc<dyn ExecutionPlan>,
    predicate: PhysicalExpr,
}

impl FilterExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, predicate: PhysicalExpr) -> Self {
        Self { input, predicate }
    }
}

impl ExecutionPlan for FilterExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> &PlanSchema {
        self.input.schema()
    }

    fn init(&self, ctx: &ExecContext) -> Result<()> {
        self.input.init(ctx)
    }

    fn poll(&self, ctx: &ExecContext) -> Result<ExecPoll> {
        match self.input.poll(ctx)? {
            ExecPoll::Batch(batch) => {
                let mut kept = Vec::new();
                for row in batch {
                    if is_true(&self.predicate.evaluate(&row)?) {
                        kept.push(row);
                    }
                }
                Ok(ExecPoll::Batch(kept))
            }
            other => Ok(other),
        }
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }
}

pub struct ProjectionExec {
    input: Arc<dyn ExecutionPlan>,
    exprs: Vec<PhysicalExpr>,
    schema: PlanSchema,
}

impl ProjectionExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, exprs: Vec<PhysicalExpr>, schema: PlanSchema) -> Self {
        Self { input, exprs, schema }
    }
}

impl ExecutionPlan for ProjectionExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> &PlanSchema {
        &self.schema
    }

    fn init(&self, ctx: &ExecContext) -> Result<()> {
        self.input.init(ctx)
    }

    fn poll(&self, ctx: &ExecContext) -> Result<ExecPoll> {
        match self.input.poll(ctx)? {
            ExecPoll::Batch(batch) => {
                let mut out = Vec::with_capacity(batch.len());
                for row in batch {
                    let projected = self
                        .exprs
                        .iter()
                        .map(|e| e.evaluate(&row))
                        .collect::<Result<Row>>()?;
                    out.push(projected);
                }
                Ok(ExecPoll::Batch(out))
            }
            other => Ok(other),
        }
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }
}

/// Engine-side sort. A pipeline breaker: buffers the whole input before
/// emitting anything, then releases the sorted rows as one batch.
pub struct SortExec {
    input: Arc<dyn ExecutionPlan>,
    keys: Vec<(PhysicalExpr, bool)>,
    buffer: RefCell<Vec<Row>>,
    emitted: Cell<bool>,
}

impl SortExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, keys: Vec<(PhysicalExpr, bool)>) -> Self {
        Self { input, keys, buffer: RefCell::new(Vec::new()), emitted: Cell::new(false) }
    }
}

impl ExecutionPlan for SortExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> &PlanSchema {
        self.input.schema()
    }

    fn init(&self, ctx: &ExecContext) -> Result<()> {
        self.input.init(ctx)
    }

    fn poll(&self, ctx: &ExecContext) -> Result<ExecPoll> {
        if self.emitted.get() {
            return Ok(ExecPoll::Done);
        }
        loop {
            match self.input.poll(ctx)? {
                ExecPoll::Batch(batch) => self.buffer.borrow_mut().extend(batch),
                ExecPoll::Pending => return Ok(ExecPoll::Pending),
                ExecPoll::Done => break,
            }
        }
        let rows = std::mem::take(&mut *self.buffer.borrow_mut());
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self
                .keys
                .iter()
                .map(|(e, _)| e.evaluate(&row))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((key, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, (_, asc)) in self.keys.iter().enumerate() {
                let ord = a[i].cmp(&b[i]);
                let ord = if *asc { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.emitted.set(true);
        Ok(ExecPoll::Batch(keyed.into_iter().map(|(_, row)| row).collect()))
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }
}
