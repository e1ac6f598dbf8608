use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::dependent::DependentJoinExec;
use crate::exec::expr::compile;
use crate::exec::query::{AccessExec, FilterExec, ProjectionExec, SortExec};
use crate::exec::ExecutionPlan;
use crate::plan::node::Plan;

/// Compile a finalized logical plan into its operator tree. Only plans that
/// went through the full planning pipeline are compilable: a bare scan or a
/// join with no strategy left in the tree is a planner bug, not a user
/// error.
pub fn build(plan: &Arc<Plan>) -> Result<Arc<dyn ExecutionPlan>> {
    match plan.as_ref() {
        Plan::Access(access) => {
            Ok(Arc::new(AccessExec::new(access.source.clone(), access.input.clone())))
        }
        Plan::Filter(filter) => {
            let input = build(&filter.input)?;
            let predicate = compile(&filter.predicate, input.schema())?;
            Ok(Arc::new(FilterExec::new(input, predicate)))
        }
        Plan::Projection(projection) => {
            let input = build(&projection.input)?;
            let exprs = projection
                .exprs
                .iter()
                .map(|e| compile(e, input.schema()))
                .collect::<Result<Vec<_>>>()?;
            Ok(Arc::new(ProjectionExec::new(input, exprs, projection.schema.clone())))
        }
        Plan::Sort(sort) => {
            let input = build(&sort.input)?;
            let keys = sort
                .keys
                .iter()
                .map(|k| compile(&k.expr, input.schema()).map(|e| (e, k.asc)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Arc::new(SortExec::new(input, keys)))
        }
        Plan::DependentJoin(dj) => Ok(Arc::new(DependentJoinExec::try_new(dj.clone())?)),
        Plan::TableScan(scan) => Err(Error::internal(format!(
            "bare scan of {} reached execution; plan was not decomposed",
            scan.relation
        ))),
        Plan::Join(join) => Err(Error::capability(format!(
            "join on {} reached execution without a strategy",
            join.condition
        ))),
    }
}
