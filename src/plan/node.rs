use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::apply_each;
use crate::catalog::capability::SourceId;
use crate::catalog::table::Table;
use crate::catalog::types::DataType;
use crate::error::{Error, Result};
use crate::plan::expr::{ColumnRef, Expr};
use crate::plan::schema::{PlanSchema, Symbol, TableReference};
use crate::plan::visitor::{TreeNode, VisitRecursion};

/// A logical plan node. Plans are immutable trees; rewrites produce new
/// trees whose untouched subtrees are shared through `Arc`, so the planner
/// can hold several candidate shapes without copying.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    TableScan(TableScan),
    /// The unit of push-down. Everything beneath an Access node is executed
    /// by the named source in one round trip; everything above runs in the
    /// engine. A well-formed Access never nests another Access.
    Access(Access),
    Filter(Filter),
    Projection(Projection),
    Sort(Sort),
    Join(Join),
    /// A cross-source join resolved into staged execution. The independent
    /// side runs first; its keys are injected into the dependent side's
    /// IN-list placeholder in batches.
    DependentJoin(DependentJoin),
}

impl Plan {
    pub fn schema(&self) -> &PlanSchema {
        match self {
            Plan::TableScan(n) => &n.schema,
            Plan::Access(n) => n.input.schema(),
            Plan::Filter(n) => n.input.schema(),
            Plan::Projection(n) => &n.schema,
            Plan::Sort(n) => n.input.schema(),
            Plan::Join(n) => &n.schema,
            Plan::DependentJoin(n) => &n.schema,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Plan::TableScan(_) => "TableScan",
            Plan::Access(_) => "Access",
            Plan::Filter(_) => "Filter",
            Plan::Projection(_) => "Projection",
            Plan::Sort(_) => "Sort",
            Plan::Join(_) => "Join",
            Plan::DependentJoin(_) => "DependentJoin",
        }
    }

    pub fn children(&self) -> Vec<&Arc<Plan>> {
        match self {
            Plan::TableScan(_) => vec![],
            Plan::Access(n) => vec![&n.input],
            Plan::Filter(n) => vec![&n.input],
            Plan::Projection(n) => vec![&n.input],
            Plan::Sort(n) => vec![&n.input],
            Plan::Join(n) => vec![&n.left, &n.right],
            Plan::DependentJoin(n) => vec![&n.independent, &n.dependent],
        }
    }

    /// Check the structural invariants every plan handed to the engine must
    /// hold: Access nodes never nest, and no join is left without a
    /// strategy.
    pub fn validate(&self) -> Result<()> {
        self.walk(|node| {
            match node {
                Plan::Access(access) => {
                    access.input.walk(|inner| {
                        if matches!(inner, Plan::Access(_)) {
                            return Err(Error::internal("nested Access node"));
                        }
                        Ok(VisitRecursion::Continue)
                    })?;
                }
                Plan::Join(join) if join.strategy == JoinStrategy::Unresolved => {
                    return Err(Error::internal(
                        "unresolved join in finalized plan",
                    ));
                }
                _ => {}
            }
            Ok(VisitRecursion::Continue)
        })?;
        Ok(())
    }
}

impl TreeNode for Plan {
    fn visit_children<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        apply_each!(|p: &Arc<Plan>| f(p); self.children())
    }
}

/// Scan of a base table on a source. Always the leaf of a plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub relation: TableReference,
    pub source: SourceId,
    pub schema: PlanSchema,
    /// Source-reported row count, if the catalog has one.
    pub row_count: Option<u64>,
}

impl TableScan {
    pub fn new(source: SourceId, table: &Table) -> Plan {
        Plan::TableScan(TableScan {
            relation: TableReference::new(table.name.as_str()),
            source,
            schema: PlanSchema::from_table(table),
            row_count: table.statistics.row_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub source: SourceId,
    pub input: Arc<Plan>,
}

impl Access {
    pub fn new(source: SourceId, input: Arc<Plan>) -> Plan {
        Plan::Access(Access { source, input })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub input: Arc<Plan>,
    pub predicate: Expr,
}

impl Filter {
    pub fn new(input: Arc<Plan>, predicate: Expr) -> Plan {
        Plan::Filter(Filter { input, predicate })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub input: Arc<Plan>,
    pub exprs: Vec<Expr>,
    pub schema: PlanSchema,
}

impl Projection {
    /// Build a projection, resolving each expression's output symbol against
    /// the input schema. Column expressions keep their qualifier and
    /// statistics; computed expressions get a positional name.
    pub fn try_new(input: Arc<Plan>, exprs: Vec<Expr>) -> Result<Plan> {
        let in_schema = input.schema();
        let mut symbols = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            let symbol = match expr {
                Expr::Column(c) => {
                    in_schema.symbol(c.relation.as_ref(), &c.name)?.clone()
                }
                other => Symbol::new(
                    None,
                    format!("expr{}", i),
                    infer_type(other, in_schema)?,
                    true,
                ),
            };
            symbols.push(symbol);
        }
        Ok(Plan::Projection(Projection { input, exprs, schema: PlanSchema::new(symbols) }))
    }
}

/// Best-effort static type of an expression against a schema. Engine
/// builtins are typed by name; unknown functions fall back to String.
fn infer_type(expr: &Expr, schema: &PlanSchema) -> Result<DataType> {
    use crate::plan::expr::Operator;
    Ok(match expr {
        Expr::Column(c) => schema.symbol(c.relation.as_ref(), &c.name)?.datatype,
        Expr::Literal(v) => v.datatype(),
        Expr::BinaryExpr { left, op, right } => {
            if op.is_predicate() {
                DataType::Boolean
            } else {
                let lt = infer_type(left, schema)?;
                let rt = infer_type(right, schema)?;
                if lt == DataType::Float || rt == DataType::Float || *op == Operator::Divide {
                    DataType::Float
                } else {
                    lt
                }
            }
        }
        Expr::Not(_) | Expr::IsNull { .. } | Expr::InList { .. } => DataType::Boolean,
        Expr::ScalarFunction { name, .. } => match name.to_lowercase().as_str() {
            "abs" | "length" => infer_function_arg(expr, schema)?,
            _ => DataType::String,
        },
    })
}

fn infer_function_arg(expr: &Expr, schema: &PlanSchema) -> Result<DataType> {
    if let Expr::ScalarFunction { name, args } = expr {
        if name.eq_ignore_ascii_case("length") {
            return Ok(DataType::Integer);
        }
        if let Some(arg) = args.first() {
            return infer_type(arg, schema);
        }
    }
    Ok(DataType::String)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub asc: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        SortKey { expr, asc: true }
    }

    pub fn desc(expr: Expr) -> Self {
        SortKey { expr, asc: false }
    }
}

impl Display for SortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.expr, if self.asc { "ASC" } else { "DESC" })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub input: Arc<Plan>,
    pub keys: Vec<SortKey>,
}

impl Sort {
    pub fn new(input: Arc<Plan>, keys: Vec<SortKey>) -> Plan {
        Plan::Sort(Sort { input, keys })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl Display for JoinKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JoinKind::Inner => "Inner",
            JoinKind::Left => "Left",
            JoinKind::Right => "Right",
            JoinKind::Full => "Full",
        };
        write!(f, "{}", s)
    }
}

/// How a join will be carried out. Joins enter planning unresolved; same
/// source joins end up pushed beneath an Access node, cross-source joins
/// must be rewritten into a DependentJoin before execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinStrategy {
    Unresolved,
    Pushed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub left: Arc<Plan>,
    pub right: Arc<Plan>,
    pub kind: JoinKind,
    pub condition: Expr,
    pub strategy: JoinStrategy,
    pub schema: PlanSchema,
}

impl Join {
    pub fn try_new(
        left: Arc<Plan>,
        right: Arc<Plan>,
        kind: JoinKind,
        condition: Expr,
    ) -> Result<Plan> {
        if !condition
            .referenced_columns()
            .iter()
            .all(|c| resolvable(c, left.schema()) || resolvable(c, right.schema()))
        {
            return Err(Error::internal(format!(
                "join condition {} references columns outside its inputs",
                condition
            )));
        }
        let schema = left.schema().join(right.schema());
        Ok(Plan::Join(Join {
            left,
            right,
            kind,
            condition,
            strategy: JoinStrategy::Unresolved,
            schema,
        }))
    }
}

fn resolvable(column: &ColumnRef, schema: &PlanSchema) -> bool {
    schema.index_of(column.relation.as_ref(), &column.name).is_ok()
}

/// Staged replacement for a cross-source join. The output schema preserves
/// the original join's column order regardless of which side runs first.
#[derive(Debug, Clone, PartialEq)]
pub struct DependentJoin {
    pub independent: Arc<Plan>,
    pub dependent: Arc<Plan>,
    /// Key column as produced by the independent side.
    pub independent_key: ColumnRef,
    /// Key column the dependent side's IN-list placeholder filters on.
    pub dependent_key: ColumnRef,
    /// Keys injected per dependent query.
    pub batch_size: usize,
    /// True when the independent side was the left input of the original
    /// join. Merging uses this to order output columns.
    pub independent_is_left: bool,
    pub schema: PlanSchema,
}

impl DependentJoin {
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        independent: Arc<Plan>,
        dependent: Arc<Plan>,
        independent_key: ColumnRef,
        dependent_key: ColumnRef,
        batch_size: usize,
        independent_is_left: bool,
        schema: PlanSchema,
    ) -> Result<Plan> {
        if batch_size == 0 {
            return Err(Error::internal("dependent join batch size must be positive"));
        }
        if !resolvable(&independent_key, independent.schema()) {
            return Err(Error::internal(format!(
                "independent key {} not produced by independent side",
                independent_key
            )));
        }
        Ok(Plan::DependentJoin(DependentJoin {
            independent,
            dependent,
            independent_key,
            dependent_key,
            batch_size,
            independent_is_left,
            schema,
        }))
    }
}
