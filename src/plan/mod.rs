//! The logical plan IR: immutable trees of relational operators with
//! structural sharing, plus the expression language, schemas, traversal
//! machinery and explain rendering.

pub mod explain;
pub mod expr;
pub mod node;
pub mod schema;
pub mod visitor;

pub use explain::ExplainNode;
pub use expr::{ColumnRef, Expr, Operator};
pub use node::{
    Access, DependentJoin, Filter, Join, JoinKind, JoinStrategy, Plan, Projection, Sort, SortKey,
    TableScan,
};
pub use schema::{PlanSchema, Symbol, TableReference};
pub use visitor::{TreeNode, TreeNodeVisitor, VisitRecursion};
