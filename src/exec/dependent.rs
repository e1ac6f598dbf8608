use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::catalog::types::Value;
use crate::error::{Error, Result};
use crate::exec::compiler::build;
use crate::exec::{ExecContext, ExecPoll, ExecutionPlan, Row};
use crate::plan::expr::Expr;
use crate::plan::node::{Access, DependentJoin, Filter, Plan, Projection, Sort};
use crate::plan::schema::PlanSchema;

/// Staged execution of one dependent join.
///
/// The independent sub-plan runs on the shared worker pool and streams its
/// rows back over a channel, so sibling dependent joins make progress
/// concurrently while this one is polled. Once the independent side is
/// exhausted, its distinct non-NULL key values are chunked to the planned
/// batch size and each chunk instantiates the dependent template for one
/// source round trip. Batches run sequentially; each batch's rows are
/// merged against the buffered independent rows by key and emitted before
/// the next batch starts, so at most one batch's results are in flight.
pub struct DependentJoinExec {
    node: DependentJoin,
    schema: PlanSchema,
    independent_key_idx: usize,
    dependent_key_idx: usize,
    state: RefCell<State>,
}

enum State {
    Init,
    RunningIndependent {
        rx: Receiver<Result<Vec<Row>>>,
        rows: Vec<Row>,
    },
    RunningDependentBatch {
        independent: BTreeMap<Value, Vec<Row>>,
        batches: Vec<Vec<Value>>,
        next: usize,
        current: Option<Arc<dyn ExecutionPlan>>,
    },
    Done,
}

impl DependentJoinExec {
    pub fn try_new(node: DependentJoin) -> Result<Self> {
        let key = &node.independent_key;
        let independent_key_idx =
            node.independent.schema().index_of(key.relation.as_ref(), &key.name)?;
        let key = &node.dependent_key;
        let dependent_key_idx =
            node.dependent.schema().index_of(key.relation.as_ref(), &key.name)?;
        let schema = node.schema.clone();
        Ok(Self {
            node,
            schema,
            independent_key_idx,
            dependent_key_idx,
            state: RefCell::new(State::Init),
        })
    }

    fn spawn_harvest(&self, ctx: &ExecContext) -> Receiver<Result<Vec<Row>>> {
        let (tx, rx) = channel();
        let plan = self.node.independent.clone();
        let job_ctx = ctx.clone();
        ctx.pool.spawn(move || {
            let exec = match build(&plan).and_then(|e| {
                e.init(&job_ctx)?;
                Ok(e)
            }) {
                Ok(exec) => exec,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            loop {
                if job_ctx.cancel.is_cancelled() {
                    return;
                }
                match exec.poll(&job_ctx) {
                    Ok(ExecPoll::Batch(batch)) => {
                        if tx.send(Ok(batch)).is_err() {
                            return;
                        }
                    }
                    Ok(ExecPoll::Pending) => std::thread::sleep(Duration::from_millis(1)),
                    Ok(ExecPoll::Done) => return,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        });
        rx
    }

    /// Distinct, ordered, non-NULL key harvest plus the keyed buffer merged
    /// rows come from. An empty harvest finishes the join immediately; no
    /// dependent query is ever dispatched unconditioned.
    fn harvest(&self, rows: Vec<Row>) -> State {
        let mut keys = BTreeSet::new();
        let mut by_key: BTreeMap<Value, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let key = row[self.independent_key_idx].clone();
            if key.is_null() {
                continue;
            }
            keys.insert(key.clone());
            by_key.entry(key).or_default().push(row);
        }
        if keys.is_empty() {
            debug!("independent side of dependent join is empty, emitting no rows");
            return State::Done;
        }
        let keys: Vec<Value> = keys.into_iter().collect();
        let batches: Vec<Vec<Value>> =
            keys.chunks(self.node.batch_size).map(|c| c.to_vec()).collect();
        debug!(
            "harvested {} distinct keys into {} dependent batches",
            keys.len(),
            batches.len()
        );
        State::RunningDependentBatch { independent: by_key, batches, next: 0, current: None }
    }

    fn merge(&self, independent: &BTreeMap<Value, Vec<Row>>, batch: Vec<Row>) -> Vec<Row> {
        let mut out = Vec::new();
        for dep_row in batch {
            let key = &dep_row[self.dependent_key_idx];
            if key.is_null() {
                continue;
            }
            if let Some(ind_rows) = independent.get(key) {
                for ind_row in ind_rows {
                    let mut row;
                    if self.node.independent_is_left {
                        row = ind_row.clone();
                        row.extend(dep_row.iter().cloned());
                    } else {
                        row = dep_row.clone();
                        row.extend(ind_row.iter().cloned());
                    }
                    out.push(row);
                }
            }
        }
        out
    }
}

impl ExecutionPlan for DependentJoinExec {
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
            return Err(Error::cancelled("dependent join cancelled"));
        }
        loop {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Init => {
                    let rx = self.spawn_harvest(ctx);
                    *state = State::RunningIndependent { rx, rows: Vec::new() };
                }
                State::RunningIndependent { rx, rows } => {
                    loop {
                        match rx.try_recv() {
                            Ok(Ok(batch)) => rows.extend(batch),
                            Ok(Err(e)) => {
                                *state = State::Done;
                                return Err(e);
                            }
                            Err(TryRecvError::Empty) => return Ok(ExecPoll::Pending),
                            Err(TryRecvError::Disconnected) => break,
                        }
                    }
                    let rows = std::mem::take(rows);
                    let next = self.harvest(rows);
                    let finished = matches!(next, State::Done);
                    *state = next;
                    if finished {
                        return Ok(ExecPoll::Done);
                    }
                }
                State::RunningDependentBatch { independent, batches, next, current } => {
                    if current.is_none() {
                        if *next >= batches.len() {
                            *state = State::Done;
                            return Ok(ExecPoll::Done);
                        }
                        let filled = fill_placeholder(&self.node.dependent, &batches[*next]);
                        *next += 1;
                        let exec = build(&filled)?;
                        exec.init(ctx)?;
                        *current = Some(exec);
                    }
                    if let Some(exec) = current {
                        match exec.poll(ctx) {
                            Ok(ExecPoll::Batch(batch)) => {
                                return Ok(ExecPoll::Batch(self.merge(independent, batch)));
                            }
                            Ok(ExecPoll::Pending) => return Ok(ExecPoll::Pending),
                            Ok(ExecPoll::Done) => *current = None,
                            Err(e) => {
                                *state = State::Done;
                                return Err(e);
                            }
                        }
                    }
                }
                State::Done => return Ok(ExecPoll::Done),
            }
        }
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        // Sub-plans are compiled lazily per stage, so the operator tree ends
        // here; diagnostics show the staging through the logical plan.
        vec![]
    }
}

/// Instantiate the dependent template for one batch: the empty IN-list left
/// by the planner is replaced with the batch's key values. Shared subtrees
/// below the placeholder are reused, not copied.
pub fn fill_placeholder(plan: &Arc<Plan>, values: &[Value]) -> Arc<Plan> {
    match plan.as_ref() {
        Plan::Filter(filter) => {
            if let Expr::InList { expr, list, negated: false } = &filter.predicate {
                if list.is_empty() {
                    let filled = Expr::InList {
                        expr: expr.clone(),
                        list: values.to_vec(),
                        negated: false,
                    };
                    return Arc::new(Filter::new(filter.input.clone(), filled));
                }
            }
            let input = fill_placeholder(&filter.input, values);
            if Arc::ptr_eq(&input, &filter.input) {
                return plan.clone();
            }
            Arc::new(Filter::new(input, filter.predicate.clone()))
        }
        Plan::Access(access) => {
            let input = fill_placeholder(&access.input, values);
            if Arc::ptr_eq(&input, &access.input) {
                return plan.clone();
            }
            Arc::new(Plan::Access(Access { source: access.source.clone(), input }))
        }
        Plan::Projection(projection) => {
            let input = fill_placeholder(&projection.input, values);
            if Arc::ptr_eq(&input, &projection.input) {
                return plan.clone();
            }
            Arc::new(Plan::Projection(Projection {
                input,
                exprs: projection.exprs.clone(),
                schema: projection.schema.clone(),
            }))
        }
        Plan::Sort(sort) => {
            let input = fill_placeholder(&sort.input, values);
            if Arc::ptr_eq(&input, &sort.input) {
                return plan.clone();
            }
            Arc::new(Sort::new(input, sort.keys.clone()))
        }
        _ => plan.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::{Column, Table};
    use crate::catalog::types::DataType;
    use crate::plan::node::TableScan;

    fn template() -> Arc<Plan> {
        let table = Table::new(
            "t2",
            vec![Column::new("k", DataType::Integer), Column::new("w", DataType::String)],
        );
        let scan = Arc::new(TableScan::new("b".into(), &table));
        let placeholder = Expr::column("t2", "k").in_list(vec![]);
        Arc::new(Access::new("b".into(), Arc::new(Filter::new(scan, placeholder))))
    }

    #[test]
    fn test_fill_placeholder_substitutes_batch() {
        let filled = fill_placeholder(&template(), &[1.into(), 2.into()]);
        assert_eq!(
            filled.to_string(),
            "Access: source=b\n\
             \x20 Filter: t2.k IN (1, 2)\n\
             \x20   TableScan: t2 source=b"
        );
        // The template itself is untouched and reusable for the next batch.
        assert!(template().to_string().contains("IN ()"));
    }

    #[test]
    fn test_fill_placeholder_leaves_real_in_lists_alone() {
        let table = Table::new("t", vec![Column::new("k", DataType::Integer)]);
        let scan = Arc::new(TableScan::new("b".into(), &table));
        let filter = Arc::new(Filter::new(
            scan,
            Expr::column("t", "k").in_list(vec![9.into()]),
        ));
        let plan = Arc::new(Access::new("b".into(), filter));
        let filled = fill_placeholder(&plan, &[1.into()]);
        assert!(Arc::ptr_eq(&filled, &plan));
    }
}
