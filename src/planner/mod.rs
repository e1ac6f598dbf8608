//! Planning: capability-driven decomposition into per-source Access nodes,
//! then dependent-join resolution for the joins no single source can run.

pub mod decompose;
pub mod dependent;
pub mod estimator;

use std::sync::Arc;

use log::debug;

use crate::catalog::capability::CapabilityRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::plan::node::Plan;
use crate::planner::decompose::Decomposer;
use crate::planner::dependent::DependentJoinPlanner;
use crate::planner::estimator::CardinalityEstimator;

/// Front door of the planning pipeline. Planning is synchronous and reads
/// shared registries without locking; all per-query state lives in the
/// passes themselves, so one Planner serves concurrent queries.
pub struct Planner {
    registry: Arc<CapabilityRegistry>,
    default_table_rows: f64,
    default_selectivity: f64,
    batch_ceiling: usize,
}

impl Planner {
    pub fn new(registry: Arc<CapabilityRegistry>, config: &Config) -> Self {
        Self {
            registry,
            default_table_rows: config.default_table_rows,
            default_selectivity: config.default_selectivity,
            batch_ceiling: config.dependent_batch_ceiling,
        }
    }

    /// Turn a bound query tree into an executable plan: decompose, resolve
    /// cross-source joins, and check structural invariants on the result.
    pub fn plan(&self, tree: &Arc<Plan>) -> Result<Arc<Plan>> {
        let decomposed = Decomposer::new(&self.registry).decompose(tree)?;
        debug!("decomposed plan:\n{}", decomposed);
        let estimator =
            CardinalityEstimator::new(self.default_table_rows, self.default_selectivity);
        let resolved = DependentJoinPlanner::new(&self.registry, &estimator, self.batch_ceiling)
            .resolve(&decomposed)?;
        debug!("resolved plan:\n{}", resolved);
        resolved.validate()?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::capability::{CapabilityDescriptorBuilder, OperatorKind};
    use crate::catalog::table::{Column, Table, TableStatistics};
    use crate::catalog::types::DataType;
    use crate::plan::expr::Expr;
    use crate::plan::node::{Join, JoinKind, TableScan};

    #[test]
    fn test_end_to_end_plan() -> Result<()> {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(
            "a",
            CapabilityDescriptorBuilder::new()
                .operators([OperatorKind::Scan, OperatorKind::Filter, OperatorKind::Join])
                .supports_in_list(0)
                .build(),
        );
        registry.register(
            "b",
            CapabilityDescriptorBuilder::new()
                .operators([OperatorKind::Scan, OperatorKind::Filter])
                .supports_in_list(50)
                .build(),
        );

        let t1 = Table::new(
            "t1",
            vec![Column::new("k", DataType::Integer), Column::new("v", DataType::String)],
        )
        .with_statistics(TableStatistics::new(500).distinct("k", 120));
        let t2 = Table::new(
            "t2",
            vec![Column::new("k", DataType::Integer), Column::new("w", DataType::String)],
        )
        .with_statistics(TableStatistics::new(10000));

        let tree = Arc::new(Join::try_new(
            Arc::new(TableScan::new("a".into(), &t1)),
            Arc::new(TableScan::new("b".into(), &t2)),
            JoinKind::Inner,
            Expr::column("t1", "k").eq(Expr::column("t2", "k")),
        )?);

        let planner = Planner::new(registry, &Config::default());
        let plan = planner.plan(&tree)?;
        assert_eq!(
            plan.to_string(),
            "DependentJoin: t1.k = t2.k batch_size=50 independent=left\n\
             \x20 Access: source=a\n\
             \x20   TableScan: t1 source=a\n\
             \x20 Access: source=b\n\
             \x20   Filter: t2.k IN ()\n\
             \x20     TableScan: t2 source=b"
        );
        Ok(())
    }
}
