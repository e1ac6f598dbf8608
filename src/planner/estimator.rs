use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::plan::expr::{ColumnRef, Expr, Operator};
use crate::plan::node::Plan;
use crate::plan::schema::PlanSchema;

/// Heuristic row-count estimator.
///
/// The only contract is a consistent ordering: the planner uses estimates to
/// pick the smaller side of a join, never as absolute costs. Estimates are
/// memoized per subtree by node identity, which is sound because plan nodes
/// are immutable and each entry keeps its node alive, so an address is never
/// reused for a different node while its estimate is cached.
pub struct CardinalityEstimator {
    default_table_rows: f64,
    default_selectivity: f64,
    memo: RefCell<HashMap<usize, (Arc<Plan>, f64)>>,
}

impl CardinalityEstimator {
    pub fn new(default_table_rows: f64, default_selectivity: f64) -> Self {
        Self { default_table_rows, default_selectivity, memo: RefCell::new(HashMap::new()) }
    }

    pub fn estimate(&self, plan: &Arc<Plan>) -> f64 {
        let key = Arc::as_ptr(plan) as usize;
        if let Some((_, cached)) = self.memo.borrow().get(&key) {
            return *cached;
        }
        let estimate = self.compute(plan);
        self.memo.borrow_mut().insert(key, (Arc::clone(plan), estimate));
        estimate
    }

    fn compute(&self, plan: &Arc<Plan>) -> f64 {
        match plan.as_ref() {
            Plan::TableScan(scan) => {
                scan.row_count.map(|n| n as f64).unwrap_or(self.default_table_rows)
            }
            Plan::Access(access) => self.estimate(&access.input),
            Plan::Filter(filter) => {
                let child = self.estimate(&filter.input);
                (child * self.selectivity(&filter.predicate, filter.input.schema())).max(1.0)
            }
            Plan::Projection(projection) => self.estimate(&projection.input),
            Plan::Sort(sort) => self.estimate(&sort.input),
            Plan::Join(join) => {
                let left = self.estimate(&join.left);
                let right = self.estimate(&join.right);
                let distinct = join
                    .condition
                    .as_column_equality()
                    .map(|(l, r)| self.key_distinct(l, r, plan.schema()))
                    .unwrap_or(1.0);
                (left * right / distinct.max(1.0)).max(1.0)
            }
            Plan::DependentJoin(dj) => {
                let independent = self.estimate(&dj.independent);
                let dependent = self.estimate(&dj.dependent);
                let distinct = self
                    .distinct_of(&dj.independent_key, dj.independent.schema())
                    .unwrap_or(1.0);
                (independent * dependent / distinct.max(1.0)).max(1.0)
            }
        }
    }

    /// Selectivity of a predicate. Equality against a column with known
    /// distinct count refines to `1/distinct`; conjunctions multiply;
    /// everything else takes the configured default.
    fn selectivity(&self, predicate: &Expr, schema: &PlanSchema) -> f64 {
        match predicate {
            Expr::BinaryExpr { left, op: Operator::And, right } => {
                self.selectivity(left, schema) * self.selectivity(right, schema)
            }
            Expr::BinaryExpr { left, op: Operator::Eq, right } => {
                let column = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(_)) => Some(c),
                    (Expr::Literal(_), Expr::Column(c)) => Some(c),
                    _ => None,
                };
                column
                    .and_then(|c| self.distinct_of(c, schema))
                    .map(|d| 1.0 / d.max(1.0))
                    .unwrap_or(self.default_selectivity)
            }
            _ => self.default_selectivity,
        }
    }

    /// Distinct count of a join key, taking the larger of the two sides
    /// when both report one.
    fn key_distinct(&self, left: &ColumnRef, right: &ColumnRef, schema: &PlanSchema) -> f64 {
        let l = self.distinct_of(left, schema);
        let r = self.distinct_of(right, schema);
        match (l, r) {
            (Some(l), Some(r)) => l.max(r),
            (Some(d), None) | (None, Some(d)) => d,
            (None, None) => 1.0,
        }
    }

    fn distinct_of(&self, column: &ColumnRef, schema: &PlanSchema) -> Option<f64> {
        schema
            .symbol(column.relation.as_ref(), &column.name)
            .ok()
            .and_then(|s| s.distinct_count)
            .map(|n| n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::{Column, Table, TableStatistics};
    use crate::catalog::types::DataType;
    use crate::plan::node::{Filter, Join, JoinKind, TableScan};

    fn scan(source: &str, name: &str, rows: u64, key_distinct: u64) -> Arc<Plan> {
        let table = Table::new(
            name,
            vec![Column::new("k", DataType::Integer), Column::new("v", DataType::String)],
        )
        .with_statistics(TableStatistics::new(rows).distinct("k", key_distinct));
        Arc::new(TableScan::new(source.into(), &table))
    }

    fn estimator() -> CardinalityEstimator {
        CardinalityEstimator::new(1000.0, 0.2)
    }

    #[test]
    fn test_scan_uses_reported_rows() {
        let est = estimator();
        assert_eq!(est.estimate(&scan("a", "t1", 500, 120)), 500.0);
    }

    #[test]
    fn test_filter_equality_refines_selectivity() {
        let est = estimator();
        let base = scan("a", "t1", 500, 100);
        let eq = Arc::new(Filter::new(
            base.clone(),
            Expr::column("t1", "k").eq(Expr::literal(1)),
        ));
        // 1/distinct beats the default 0.2.
        assert_eq!(est.estimate(&eq), 5.0);

        let range = Arc::new(Filter::new(
            base,
            Expr::binary(Expr::column("t1", "k"), Operator::Lt, Expr::literal(10)),
        ));
        assert_eq!(est.estimate(&range), 100.0);
    }

    #[test]
    fn test_join_divides_by_key_distinct() -> crate::error::Result<()> {
        let est = estimator();
        let left = scan("a", "t1", 500, 120);
        let right = scan("b", "t2", 10000, 9000);
        let join = Arc::new(Join::try_new(
            left,
            right,
            JoinKind::Inner,
            Expr::column("t1", "k").eq(Expr::column("t2", "k")),
        )?);
        // 500 * 10000 / max(120, 9000)
        let expected = 500.0 * 10000.0 / 9000.0;
        assert!((est.estimate(&join) - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_memoized_by_identity() {
        let est = estimator();
        let a = scan("a", "t1", 500, 120);
        assert_eq!(est.estimate(&a), 500.0);
        assert_eq!(est.estimate(&a), 500.0);
        assert_eq!(est.memo.borrow().len(), 1);
    }

    #[test]
    fn test_dropped_nodes_never_alias_cached_estimates() {
        let est = estimator();
        let first = scan("a", "t1", 500, 120);
        assert_eq!(est.estimate(&first), 500.0);
        drop(first);
        // Fresh nodes may land on a recycled allocation; each must get its
        // own estimate, not a cached one from a dead node.
        for rows in [9999u64, 12345, 777] {
            let fresh = scan("a", "t2", rows, 10);
            assert_eq!(est.estimate(&fresh), rows as f64);
        }
    }
}
