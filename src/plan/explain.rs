use std::fmt::{Display, Formatter};

use crate::error::Result;
use crate::plan::node::Plan;
use crate::plan::visitor::{TreeNode, TreeNodeVisitor, VisitRecursion};

/// A plan node flattened for diagnostics: a name, ordered properties, and
/// ordered children. This is the stable structure external tooling walks;
/// the textual rendering below is derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainNode {
    pub name: &'static str,
    pub properties: Vec<(&'static str, String)>,
    pub children: Vec<ExplainNode>,
}

impl ExplainNode {
    pub fn from_plan(plan: &Plan) -> ExplainNode {
        let properties = match plan {
            Plan::TableScan(n) => vec![
                ("relation", n.relation.to_string()),
                ("source", n.source.to_string()),
            ],
            Plan::Access(n) => vec![("source", n.source.to_string())],
            Plan::Filter(n) => vec![("predicate", n.predicate.to_string())],
            Plan::Projection(n) => {
                let exprs: Vec<String> = n.exprs.iter().map(|e| e.to_string()).collect();
                vec![("exprs", exprs.join(", "))]
            }
            Plan::Sort(n) => {
                let keys: Vec<String> = n.keys.iter().map(|k| k.to_string()).collect();
                vec![("keys", keys.join(", "))]
            }
            Plan::Join(n) => vec![
                ("kind", n.kind.to_string()),
                ("condition", n.condition.to_string()),
            ],
            Plan::DependentJoin(n) => vec![
                ("independent_key", n.independent_key.to_string()),
                ("dependent_key", n.dependent_key.to_string()),
                ("batch_size", n.batch_size.to_string()),
                (
                    "independent",
                    if n.independent_is_left { "left" } else { "right" }.to_string(),
                ),
            ],
        };
        ExplainNode {
            name: plan.name(),
            properties,
            children: plan.children().iter().map(|c| Self::from_plan(c)).collect(),
        }
    }
}

/// Renders a plan as an indented tree, two spaces per level. This is the
/// canonical textual form used by explain output and plan snapshot tests.
struct IndentVisitor<'a, 'b> {
    f: &'a mut Formatter<'b>,
    indent: usize,
}

impl TreeNodeVisitor<'_> for IndentVisitor<'_, '_> {
    type Node = Plan;

    fn f_down(&mut self, node: &Plan) -> Result<VisitRecursion> {
        if self.indent > 0 {
            writeln!(self.f)?;
        }
        write!(self.f, "{:indent$}", "", indent = self.indent * 2)?;
        describe(node, self.f)?;
        self.indent += 1;
        Ok(VisitRecursion::Continue)
    }

    fn f_up(&mut self, _node: &Plan) -> Result<VisitRecursion> {
        self.indent -= 1;
        Ok(VisitRecursion::Continue)
    }
}

fn describe(node: &Plan, f: &mut Formatter<'_>) -> std::fmt::Result {
    match node {
        Plan::TableScan(n) => write!(f, "TableScan: {} source={}", n.relation, n.source),
        Plan::Access(n) => write!(f, "Access: source={}", n.source),
        Plan::Filter(n) => write!(f, "Filter: {}", n.predicate),
        Plan::Projection(n) => {
            let exprs: Vec<String> = n.exprs.iter().map(|e| e.to_string()).collect();
            write!(f, "Projection: {}", exprs.join(", "))
        }
        Plan::Sort(n) => {
            let keys: Vec<String> = n.keys.iter().map(|k| k.to_string()).collect();
            write!(f, "Sort: {}", keys.join(", "))
        }
        Plan::Join(n) => write!(f, "Join: {} {}", n.kind, n.condition),
        Plan::DependentJoin(n) => write!(
            f,
            "DependentJoin: {} = {} batch_size={} independent={}",
            n.independent_key,
            n.dependent_key,
            n.batch_size,
            if n.independent_is_left { "left" } else { "right" },
        ),
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut visitor = IndentVisitor { f, indent: 0 };
        self.visit(&mut visitor).map_err(|_| std::fmt::Error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::table::{Column, Table};
    use crate::catalog::types::DataType;
    use crate::plan::expr::Expr;
    use crate::plan::node::{Access, Filter, Join, JoinKind, TableScan};

    fn scan(source: &str, table: &str) -> Arc<Plan> {
        let table = Table::new(
            table,
            vec![Column::new("id", DataType::Integer), Column::new("k", DataType::Integer)],
        );
        Arc::new(TableScan::new(source.into(), &table))
    }

    #[test]
    fn test_display_indents_tree() -> Result<()> {
        let left = Arc::new(Access::new(
            "a".into(),
            Arc::new(Filter::new(
                scan("a", "t1"),
                Expr::column("t1", "id").eq(Expr::literal(7)),
            )),
        ));
        let right = Arc::new(Access::new("b".into(), scan("b", "t2")));
        let join = Join::try_new(
            left,
            right,
            JoinKind::Inner,
            Expr::column("t1", "k").eq(Expr::column("t2", "k")),
        )?;

        assert_eq!(
            join.to_string(),
            "Join: Inner t1.k = t2.k\n\
             \x20 Access: source=a\n\
             \x20   Filter: t1.id = 7\n\
             \x20     TableScan: t1 source=a\n\
             \x20 Access: source=b\n\
             \x20   TableScan: t2 source=b"
        );
        Ok(())
    }

    #[test]
    fn test_explain_node_structure() {
        let plan = Access::new(
            "a".into(),
            Arc::new(Filter::new(
                scan("a", "t1"),
                Expr::column("t1", "id").eq(Expr::literal(7)),
            )),
        );
        let node = ExplainNode::from_plan(&plan);
        assert_eq!(node.name, "Access");
        assert_eq!(node.properties, vec![("source", "a".to_string())]);
        assert_eq!(node.children.len(), 1);
        let filter = &node.children[0];
        assert_eq!(filter.name, "Filter");
        assert_eq!(filter.properties, vec![("predicate", "t1.id = 7".to_string())]);
        assert_eq!(filter.children[0].name, "TableScan");
        assert!(filter.children[0].children.is_empty());
    }
}
