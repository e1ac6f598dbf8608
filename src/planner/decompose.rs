use std::sync::Arc;

use crate::catalog::capability::{CapabilityRegistry, OperatorKind, SourceId};
use crate::error::{Error, Result};
use crate::plan::expr::Expr;
use crate::plan::node::{Access, Filter, Join, JoinStrategy, Plan, Projection, Sort};

/// Bottom-up decomposition: wrap every scan in an Access node scoped to its
/// owning source, then fold each parent operator into the child's Access
/// node as long as the operator kind and every function it calls stay
/// within that source's declared capabilities.
///
/// The pass is a single walk with no backtracking. When capabilities run
/// out, or a join's children land on different sources, the operator stays
/// above the Access boundary; such joins are left with an unresolved
/// strategy for the dependent join planner to pick up.
pub struct Decomposer<'a> {
    registry: &'a CapabilityRegistry,
}

impl<'a> Decomposer<'a> {
    pub fn new(registry: &'a CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn decompose(&self, plan: &Arc<Plan>) -> Result<Arc<Plan>> {
        match plan.as_ref() {
            Plan::TableScan(_) => Ok(Arc::new(Plan::Access(Access {
                source: self.scan_source(plan)?,
                input: plan.clone(),
            }))),
            Plan::Filter(filter) => {
                let child = self.decompose(&filter.input)?;
                if let Some((source, inner)) = self.pushable(
                    &child,
                    OperatorKind::Filter,
                    std::slice::from_ref(&filter.predicate),
                ) {
                    let pushed = Arc::new(Filter::new(inner.clone(), filter.predicate.clone()));
                    return Ok(Arc::new(Plan::Access(Access { source, input: pushed })));
                }
                Ok(Arc::new(Filter::new(child, filter.predicate.clone())))
            }
            Plan::Projection(projection) => {
                let child = self.decompose(&projection.input)?;
                if let Some((source, inner)) =
                    self.pushable(&child, OperatorKind::Project, &projection.exprs)
                {
                    let pushed =
                        Arc::new(Projection::try_new(inner.clone(), projection.exprs.clone())?);
                    return Ok(Arc::new(Plan::Access(Access { source, input: pushed })));
                }
                Ok(Arc::new(Projection::try_new(child, projection.exprs.clone())?))
            }
            Plan::Sort(sort) => {
                let child = self.decompose(&sort.input)?;
                let key_exprs: Vec<Expr> = sort.keys.iter().map(|k| k.expr.clone()).collect();
                if let Some((source, inner)) =
                    self.pushable(&child, OperatorKind::Sort, &key_exprs)
                {
                    let pushed = Arc::new(Sort::new(inner.clone(), sort.keys.clone()));
                    return Ok(Arc::new(Plan::Access(Access { source, input: pushed })));
                }
                Ok(Arc::new(Sort::new(child, sort.keys.clone())))
            }
            Plan::Join(join) => {
                let left = self.decompose(&join.left)?;
                let right = self.decompose(&join.right)?;
                if let Some((source, inner_left, inner_right)) =
                    self.join_pushable(&left, &right, &join.condition)
                {
                    let pushed = Arc::new(Plan::Join(Join {
                        left: inner_left.clone(),
                        right: inner_right.clone(),
                        kind: join.kind,
                        condition: join.condition.clone(),
                        strategy: JoinStrategy::Pushed,
                        schema: join.schema.clone(),
                    }));
                    return Ok(Arc::new(Plan::Access(Access { source, input: pushed })));
                }
                Ok(Arc::new(Plan::Join(Join {
                    left,
                    right,
                    kind: join.kind,
                    condition: join.condition.clone(),
                    strategy: JoinStrategy::Unresolved,
                    schema: join.schema.clone(),
                })))
            }
            Plan::Access(_) | Plan::DependentJoin(_) => Err(Error::internal(format!(
                "unexpected {} node in undecomposed plan",
                plan.name()
            ))),
        }
    }

    fn scan_source(&self, plan: &Plan) -> Result<SourceId> {
        match plan {
            Plan::TableScan(scan) => Ok(scan.source.clone()),
            _ => Err(Error::internal("scan source requested for non-scan node")),
        }
    }

    /// If `child` is an Access node whose source can take one more operator
    /// of the given kind using the given expressions, return the source and
    /// the subtree to extend.
    fn pushable<'p>(
        &self,
        child: &'p Arc<Plan>,
        kind: OperatorKind,
        exprs: &[Expr],
    ) -> Option<(SourceId, &'p Arc<Plan>)> {
        let access = match child.as_ref() {
            Plan::Access(access) => access,
            _ => return None,
        };
        if !self.operator_supported(&access.source, kind, exprs) {
            return None;
        }
        Some((access.source.clone(), &access.input))
    }

    fn join_pushable<'p>(
        &self,
        left: &'p Arc<Plan>,
        right: &'p Arc<Plan>,
        condition: &Expr,
    ) -> Option<(SourceId, &'p Arc<Plan>, &'p Arc<Plan>)> {
        let (l, r) = match (left.as_ref(), right.as_ref()) {
            (Plan::Access(l), Plan::Access(r)) => (l, r),
            _ => return None,
        };
        if l.source != r.source {
            return None;
        }
        if !self.operator_supported(
            &l.source,
            OperatorKind::Join,
            std::slice::from_ref(condition),
        ) {
            return None;
        }
        Some((l.source.clone(), &l.input, &r.input))
    }

    /// Capability check for one operator: its kind, every function any of
    /// its expressions call, and IN-list support when one appears. Unknown
    /// functions deny push-down rather than assuming support.
    fn operator_supported(&self, source: &SourceId, kind: OperatorKind, exprs: &[Expr]) -> bool {
        if !self.registry.can_execute(source, kind) {
            return false;
        }
        for expr in exprs {
            for name in expr.function_names() {
                if !self.registry.supports_function(source, &name) {
                    return false;
                }
            }
            if expr.contains_in_list() && !self.registry.supports_in_list(source) {
                return false;
            }
        }
        true
    }
}
