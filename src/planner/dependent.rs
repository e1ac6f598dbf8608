use std::collections::BTreeSet;
use std::sync::Arc;

use crate::catalog::capability::{CapabilityRegistry, OperatorKind, SourceId};
use crate::error::{Error, Result};
use crate::plan::expr::{ColumnRef, Expr};
use crate::plan::node::{
    Access, DependentJoin, Filter, Join, JoinKind, JoinStrategy, Plan, Projection, Sort,
};
use crate::plan::schema::{PlanSchema, Symbol};
use crate::planner::estimator::CardinalityEstimator;

/// Rewrites every unresolved cross-source join into a [`DependentJoin`].
///
/// The smaller-estimated side becomes independent and runs first; the other
/// side's Access node is turned into a template whose pushed subtree gains
/// an empty IN-list filter on its join key. At runtime the engine fills the
/// placeholder with batches of harvested keys.
pub struct DependentJoinPlanner<'a> {
    registry: &'a CapabilityRegistry,
    estimator: &'a CardinalityEstimator,
    batch_ceiling: usize,
}

impl<'a> DependentJoinPlanner<'a> {
    pub fn new(
        registry: &'a CapabilityRegistry,
        estimator: &'a CardinalityEstimator,
        batch_ceiling: usize,
    ) -> Self {
        Self { registry, estimator, batch_ceiling }
    }

    pub fn resolve(&self, plan: &Arc<Plan>) -> Result<Arc<Plan>> {
        let required: BTreeSet<ColumnRef> = plan
            .schema()
            .symbols
            .iter()
            .map(|s| ColumnRef::new(s.relation.clone(), s.name.as_str()))
            .collect();
        self.resolve_node(plan, &required)
    }

    /// Post-order rewrite. `required` carries the columns every ancestor
    /// still needs, so the independent side of a conversion can be narrowed
    /// to its join key plus what actually flows upward.
    fn resolve_node(
        &self,
        plan: &Arc<Plan>,
        required: &BTreeSet<ColumnRef>,
    ) -> Result<Arc<Plan>> {
        match plan.as_ref() {
            Plan::TableScan(_) | Plan::Access(_) | Plan::DependentJoin(_) => Ok(plan.clone()),
            Plan::Filter(filter) => {
                let mut required = required.clone();
                required.extend(filter.predicate.referenced_columns());
                let child = self.resolve_node(&filter.input, &required)?;
                if Arc::ptr_eq(&child, &filter.input) {
                    return Ok(plan.clone());
                }
                Ok(Arc::new(Filter::new(child, filter.predicate.clone())))
            }
            Plan::Projection(projection) => {
                let required: BTreeSet<ColumnRef> = projection
                    .exprs
                    .iter()
                    .flat_map(|e| e.referenced_columns())
                    .collect();
                let child = self.resolve_node(&projection.input, &required)?;
                if Arc::ptr_eq(&child, &projection.input) {
                    return Ok(plan.clone());
                }
                Ok(Arc::new(Projection::try_new(child, projection.exprs.clone())?))
            }
            Plan::Sort(sort) => {
                let mut required = required.clone();
                for key in &sort.keys {
                    required.extend(key.expr.referenced_columns());
                }
                let child = self.resolve_node(&sort.input, &required)?;
                if Arc::ptr_eq(&child, &sort.input) {
                    return Ok(plan.clone());
                }
                Ok(Arc::new(Sort::new(child, sort.keys.clone())))
            }
            Plan::Join(join) if join.strategy == JoinStrategy::Unresolved => {
                self.convert(join, required)
            }
            Plan::Join(join) => {
                let mut required = required.clone();
                required.extend(join.condition.referenced_columns());
                let left = self.resolve_node(&join.left, &required)?;
                let right = self.resolve_node(&join.right, &required)?;
                if Arc::ptr_eq(&left, &join.left) && Arc::ptr_eq(&right, &join.right) {
                    return Ok(plan.clone());
                }
                // Rebuild around the resolved children without losing the
                // strategy the join already carries.
                let schema = left.schema().join(right.schema());
                Ok(Arc::new(Plan::Join(Join {
                    left,
                    right,
                    kind: join.kind,
                    condition: join.condition.clone(),
                    strategy: join.strategy,
                    schema,
                })))
            }
        }
    }

    fn convert(&self, join: &Join, required: &BTreeSet<ColumnRef>) -> Result<Arc<Plan>> {
        let mut child_required = required.clone();
        child_required.extend(join.condition.referenced_columns());
        let left = self.resolve_node(&join.left, &child_required)?;
        let right = self.resolve_node(&join.right, &child_required)?;

        if join.kind != JoinKind::Inner {
            return Err(Error::unplannable(format!(
                "cross-source {} join on {} cannot be staged; only inner joins are supported",
                join.kind, join.condition
            )));
        }
        let (a, b) = join.condition.as_column_equality().ok_or_else(|| {
            Error::unplannable(format!(
                "cross-source join condition {} is not a single column equality",
                join.condition
            ))
        })?;
        let (left_key, right_key) = match (
            resolvable(a, left.schema()),
            resolvable(b, right.schema()),
            resolvable(b, left.schema()),
            resolvable(a, right.schema()),
        ) {
            (true, true, _, _) => (a.clone(), b.clone()),
            (_, _, true, true) => (b.clone(), a.clone()),
            _ => {
                return Err(Error::unplannable(format!(
                    "join keys in {} do not resolve one per side",
                    join.condition
                )))
            }
        };

        // Smaller estimate runs first, ties go left. The dependent side must
        // end in an Access whose source accepts a batched IN-list filter;
        // when the chosen side cannot, the sides swap, and when neither can
        // the join is rejected.
        let left_rows = self.estimator.estimate(&left);
        let right_rows = self.estimator.estimate(&right);
        let mut independent_is_left = left_rows <= right_rows;
        if !self.in_list_capable(side(&left, &right, !independent_is_left)) {
            if self.in_list_capable(side(&left, &right, independent_is_left)) {
                independent_is_left = !independent_is_left;
            } else {
                return Err(Error::unplannable(format!(
                    "neither side of cross-source join on {} accepts an IN-list filter",
                    join.condition
                )));
            }
        }

        let (independent, dependent) = if independent_is_left {
            (left.clone(), right.clone())
        } else {
            (right.clone(), left.clone())
        };
        let (independent_key, dependent_key) = if independent_is_left {
            (left_key, right_key)
        } else {
            (right_key, left_key)
        };

        let dependent_source = match dependent.as_ref() {
            Plan::Access(access) => access.source.clone(),
            _ => return Err(Error::internal("dependent side is not an Access node")),
        };
        let batch_size = match self.registry.max_in_list(&dependent_source) {
            Some(limit) => limit.min(self.batch_ceiling),
            None => self.batch_ceiling,
        }
        .max(1);

        let independent =
            self.narrow_independent(independent, &independent_key, &child_required)?;
        let dependent = self.attach_placeholder(&dependent, &dependent_key)?;

        let schema = if independent_is_left {
            independent.schema().join(dependent.schema())
        } else {
            dependent.schema().join(independent.schema())
        };
        DependentJoin::try_new(
            independent,
            dependent,
            independent_key,
            dependent_key,
            batch_size,
            independent_is_left,
            schema,
        )
        .map(Arc::new)
    }

    fn in_list_capable(&self, plan: &Arc<Plan>) -> bool {
        match plan.as_ref() {
            Plan::Access(access) => {
                self.registry.supports_in_list(&access.source)
                    && self.registry.can_execute(&access.source, OperatorKind::Filter)
            }
            _ => false,
        }
    }

    /// Project the independent side down to its join key plus the columns
    /// ancestors still reference. The projection is pushed into the Access
    /// node when the source can project, otherwise it runs engine-side.
    fn narrow_independent(
        &self,
        independent: Arc<Plan>,
        key: &ColumnRef,
        required: &BTreeSet<ColumnRef>,
    ) -> Result<Arc<Plan>> {
        let schema = independent.schema();
        let keep: Vec<Expr> = schema
            .symbols
            .iter()
            .filter(|s| symbol_matches(s, key) || required.iter().any(|c| symbol_matches(s, c)))
            .map(|s| Expr::Column(ColumnRef::new(s.relation.clone(), s.name.as_str())))
            .collect();
        if keep.len() == schema.len() {
            return Ok(independent);
        }
        if let Plan::Access(access) = independent.as_ref() {
            if self.registry.can_execute(&access.source, OperatorKind::Project) {
                let pushed = Arc::new(Projection::try_new(access.input.clone(), keep)?);
                return Ok(Arc::new(Plan::Access(Access {
                    source: access.source.clone(),
                    input: pushed,
                })));
            }
        }
        Projection::try_new(independent, keep).map(Arc::new)
    }

    /// Rebuild the dependent Access node with an empty IN-list filter on the
    /// join key at the top of its pushed subtree. The empty list is the slot
    /// batch instantiation fills.
    fn attach_placeholder(&self, dependent: &Arc<Plan>, key: &ColumnRef) -> Result<Arc<Plan>> {
        let access = match dependent.as_ref() {
            Plan::Access(access) => access,
            _ => return Err(Error::internal("dependent side is not an Access node")),
        };
        let placeholder = Expr::Column(key.clone()).in_list(vec![]);
        let filtered = Arc::new(Filter::new(access.input.clone(), placeholder));
        Ok(Arc::new(Plan::Access(Access {
            source: access.source.clone(),
            input: filtered,
        })))
    }
}

fn resolvable(column: &ColumnRef, schema: &PlanSchema) -> bool {
    schema.index_of(column.relation.as_ref(), &column.name).is_ok()
}

fn symbol_matches(symbol: &Symbol, column: &ColumnRef) -> bool {
    symbol.name == column.name
        && (column.relation.is_none() || symbol.relation == column.relation)
}

fn side<'p>(left: &'p Arc<Plan>, right: &'p Arc<Plan>, is_left: bool) -> &'p Arc<Plan> {
    if is_left {
        left
    } else {
        right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::capability::CapabilityDescriptorBuilder;
    use crate::catalog::table::{Column, Table, TableStatistics};
    use crate::catalog::types::DataType;
    use crate::plan::node::TableScan;
    use crate::planner::decompose::Decomposer;

    fn t1(rows: u64) -> Table {
        Table::new(
            "t1",
            vec![
                Column::new("k", DataType::Integer),
                Column::new("v", DataType::String),
                Column::new("extra", DataType::Float),
            ],
        )
        .with_statistics(TableStatistics::new(rows).distinct("k", 120))
    }

    fn t2(rows: u64) -> Table {
        Table::new(
            "t2",
            vec![Column::new("k", DataType::Integer), Column::new("w", DataType::String)],
        )
        .with_statistics(TableStatistics::new(rows))
    }

    fn registry(b_max_in_list: usize) -> CapabilityRegistry {
        let registry = CapabilityRegistry::new();
        registry.register(
            "a",
            CapabilityDescriptorBuilder::new()
                .operators([
                    OperatorKind::Scan,
                    OperatorKind::Filter,
                    OperatorKind::Project,
                    OperatorKind::Join,
                ])
                .supports_in_list(0)
                .build(),
        );
        registry.register(
            "b",
            CapabilityDescriptorBuilder::new()
                .operators([OperatorKind::Scan, OperatorKind::Filter])
                .supports_in_list(b_max_in_list)
                .build(),
        );
        registry
    }

    fn cross_join(registry: &CapabilityRegistry, left: Arc<Plan>, right: Arc<Plan>) -> Arc<Plan> {
        let join = Arc::new(
            Join::try_new(
                left,
                right,
                JoinKind::Inner,
                Expr::column("t1", "k").eq(Expr::column("t2", "k")),
            )
            .unwrap(),
        );
        Decomposer::new(registry).decompose(&join).unwrap()
    }

    fn planner<'a>(
        registry: &'a CapabilityRegistry,
        estimator: &'a CardinalityEstimator,
    ) -> DependentJoinPlanner<'a> {
        DependentJoinPlanner::new(registry, estimator, 1024)
    }

    #[test]
    fn test_smaller_side_becomes_independent() -> Result<()> {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(500))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let out = planner(&registry, &estimator).resolve(&decomposed)?;
        assert_eq!(
            out.to_string(),
            "DependentJoin: t1.k = t2.k batch_size=50 independent=left\n\
             \x20 Access: source=a\n\
             \x20   TableScan: t1 source=a\n\
             \x20 Access: source=b\n\
             \x20   Filter: t2.k IN ()\n\
             \x20     TableScan: t2 source=b"
        );
        out.validate()?;
        Ok(())
    }

    #[test]
    fn test_tie_breaks_left() -> Result<()> {
        let registry = registry(0);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(700))),
            Arc::new(TableScan::new("b".into(), &t2(700))),
        );
        let out = planner(&registry, &estimator).resolve(&decomposed)?;
        match out.as_ref() {
            Plan::DependentJoin(dj) => {
                assert!(dj.independent_is_left);
                assert_eq!(dj.independent_key.to_string(), "t1.k");
                assert_eq!(dj.batch_size, 1024);
            }
            other => panic!("expected dependent join, got {}", other.name()),
        }
        Ok(())
    }

    #[test]
    fn test_swaps_when_dependent_lacks_in_list() -> Result<()> {
        // a is smaller, but b cannot take an IN-list, so the sides swap: b
        // runs first and a becomes the dependent side despite the estimates.
        let registry = CapabilityRegistry::new();
        registry.register(
            "a",
            CapabilityDescriptorBuilder::new()
                .operators([OperatorKind::Scan, OperatorKind::Filter])
                .supports_in_list(0)
                .build(),
        );
        registry.register(
            "b",
            CapabilityDescriptorBuilder::new().operator(OperatorKind::Scan).build(),
        );
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(10))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let out = planner(&registry, &estimator).resolve(&decomposed)?;
        match out.as_ref() {
            Plan::DependentJoin(dj) => {
                assert!(!dj.independent_is_left);
                assert_eq!(dj.independent_key.to_string(), "t2.k");
                assert_eq!(dj.dependent_key.to_string(), "t1.k");
            }
            other => panic!("expected dependent join, got {}", other.name()),
        }
        Ok(())
    }

    #[test]
    fn test_rejects_when_neither_side_accepts_in_list() {
        let registry = CapabilityRegistry::new();
        registry.register(
            "a",
            CapabilityDescriptorBuilder::new().operator(OperatorKind::Scan).build(),
        );
        registry.register(
            "b",
            CapabilityDescriptorBuilder::new().operator(OperatorKind::Scan).build(),
        );
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(500))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let err = planner(&registry, &estimator).resolve(&decomposed).unwrap_err();
        assert!(err.to_string().contains("unplannable"));
    }

    #[test]
    fn test_rejects_non_equality_condition() {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let join = Arc::new(
            Join::try_new(
                Arc::new(TableScan::new("a".into(), &t1(500))),
                Arc::new(TableScan::new("b".into(), &t2(10000))),
                JoinKind::Inner,
                Expr::binary(
                    Expr::column("t1", "k"),
                    crate::plan::expr::Operator::Lt,
                    Expr::column("t2", "k"),
                ),
            )
            .unwrap(),
        );
        let decomposed = Decomposer::new(&registry).decompose(&join).unwrap();
        let err = planner(&registry, &estimator).resolve(&decomposed).unwrap_err();
        assert!(err.to_string().contains("single column equality"));
    }

    #[test]
    fn test_rejects_outer_cross_source_join() {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let join = Arc::new(
            Join::try_new(
                Arc::new(TableScan::new("a".into(), &t1(500))),
                Arc::new(TableScan::new("b".into(), &t2(10000))),
                JoinKind::Left,
                Expr::column("t1", "k").eq(Expr::column("t2", "k")),
            )
            .unwrap(),
        );
        let decomposed = Decomposer::new(&registry).decompose(&join).unwrap();
        let err = planner(&registry, &estimator).resolve(&decomposed).unwrap_err();
        assert!(err.to_string().contains("only inner joins"));
    }

    #[test]
    fn test_projection_narrows_independent_side() -> Result<()> {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(500))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let query = Arc::new(Projection::try_new(
            decomposed,
            vec![Expr::column("t1", "v"), Expr::column("t2", "w")],
        )?);
        let out = planner(&registry, &estimator).resolve(&query)?;
        // t1.extra is referenced nowhere above the join, so the independent
        // side scans only the key and v, projected inside the source.
        assert_eq!(
            out.to_string(),
            "Projection: t1.v, t2.w\n\
             \x20 DependentJoin: t1.k = t2.k batch_size=50 independent=left\n\
             \x20   Access: source=a\n\
             \x20     Projection: t1.k, t1.v\n\
             \x20       TableScan: t1 source=a\n\
             \x20   Access: source=b\n\
             \x20     Filter: t2.k IN ()\n\
             \x20       TableScan: t2 source=b"
        );
        Ok(())
    }

    #[test]
    fn test_determinism() -> Result<()> {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(500))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let first = planner(&registry, &estimator).resolve(&decomposed)?;
        let second = planner(&registry, &estimator).resolve(&decomposed)?;
        assert_eq!(first.as_ref(), second.as_ref());
        Ok(())
    }

    #[test]
    fn test_rebuilt_join_keeps_its_strategy() -> Result<()> {
        let registry = registry(50);
        let estimator = CardinalityEstimator::new(1000.0, 0.2);
        let decomposed = cross_join(
            &registry,
            Arc::new(TableScan::new("a".into(), &t1(500))),
            Arc::new(TableScan::new("b".into(), &t2(10000))),
        );
        let t3 = Table::new(
            "t3",
            vec![Column::new("k", DataType::Integer), Column::new("x", DataType::String)],
        )
        .with_statistics(TableStatistics::new(200));
        let right = Arc::new(Access::new(
            "a".into(),
            Arc::new(TableScan::new("a".into(), &t3)),
        ));
        let condition = Expr::column("t1", "k").eq(Expr::column("t3", "k"));
        let schema = decomposed.schema().join(right.schema());
        let outer = Arc::new(Plan::Join(Join {
            left: decomposed,
            right,
            kind: JoinKind::Inner,
            condition,
            strategy: JoinStrategy::Pushed,
            schema,
        }));
        let out = planner(&registry, &estimator).resolve(&outer)?;
        match out.as_ref() {
            Plan::Join(join) => {
                assert_eq!(join.strategy, JoinStrategy::Pushed);
                assert!(matches!(join.left.as_ref(), Plan::DependentJoin(_)));
            }
            other => panic!("expected join, got {}", other.name()),
        }
        Ok(())
    }
}
