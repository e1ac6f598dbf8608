use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::apply_each;
use crate::catalog::types::Value;
use crate::error::Result;
use crate::plan::schema::TableReference;
use crate::plan::visitor::{TreeNode, VisitRecursion};

/// A reference to a column by (optionally qualified) name. Resolution to an
/// output position happens against a `PlanSchema` at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub relation: Option<TableReference>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(relation: Option<TableReference>, name: impl Into<String>) -> Self {
        Self { relation, name: name.into() }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self { relation: None, name: name.into() }
    }

    pub fn qualified(relation: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self { relation: Some(TableReference::new(relation)), name: name.into() }
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}.{}", relation, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    And,
    Or,
}

impl Operator {
    /// Binding strength for `Display`. Larger binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Eq
            | Operator::NotEq
            | Operator::Lt
            | Operator::LtEq
            | Operator::Gt
            | Operator::GtEq => 3,
            Operator::Plus | Operator::Minus => 4,
            Operator::Multiply | Operator::Divide => 5,
        }
    }

    /// Whether the operator yields a boolean.
    pub fn is_predicate(&self) -> bool {
        !matches!(
            self,
            Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::And => "AND",
            Operator::Or => "OR",
        };
        write!(f, "{}", s)
    }
}

/// A scalar expression tree. Expressions are structural values with no
/// interior mutability, so subtrees are shared freely via `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    BinaryExpr {
        left: Arc<Expr>,
        op: Operator,
        right: Arc<Expr>,
    },
    Not(Arc<Expr>),
    IsNull {
        expr: Arc<Expr>,
        negated: bool,
    },
    /// Membership test against a literal list. An empty list marks the slot
    /// a dependent join fills with harvested keys per batch.
    InList {
        expr: Arc<Expr>,
        list: Vec<Value>,
        negated: bool,
    },
    ScalarFunction {
        name: String,
        args: Vec<Arc<Expr>>,
    },
}

impl Expr {
    pub fn column(relation: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::qualified(relation, name))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(left: Expr, op: Operator, right: Expr) -> Self {
        Expr::BinaryExpr { left: Arc::new(left), op, right: Arc::new(right) }
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(self, Operator::Eq, other)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(self, Operator::And, other)
    }

    pub fn in_list(self, list: Vec<Value>) -> Self {
        Expr::InList { expr: Arc::new(self), list, negated: false }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::ScalarFunction { name: name.into(), args: args.into_iter().map(Arc::new).collect() }
    }

    /// Collect every column the expression references.
    pub fn referenced_columns(&self) -> BTreeSet<ColumnRef> {
        let mut out = BTreeSet::new();
        // Walking a pure expression tree cannot fail.
        let _ = self.walk(|e| {
            if let Expr::Column(c) = e {
                out.insert(c.clone());
            }
            Ok(VisitRecursion::Continue)
        });
        out
    }

    /// Collect the names of every scalar function call, lowercased.
    pub fn function_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let _ = self.walk(|e| {
            if let Expr::ScalarFunction { name, .. } = e {
                out.insert(name.to_lowercase());
            }
            Ok(VisitRecursion::Continue)
        });
        out
    }

    /// Whether the expression contains an IN-list anywhere.
    pub fn contains_in_list(&self) -> bool {
        let mut found = false;
        let _ = self.walk(|e| {
            if matches!(e, Expr::InList { .. }) {
                found = true;
                return Ok(VisitRecursion::Stop);
            }
            Ok(VisitRecursion::Continue)
        });
        found
    }

    /// If the expression is `<column> = <column>`, return the two sides.
    pub fn as_column_equality(&self) -> Option<(&ColumnRef, &ColumnRef)> {
        if let Expr::BinaryExpr { left, op: Operator::Eq, right } = self {
            if let (Expr::Column(l), Expr::Column(r)) = (left.as_ref(), right.as_ref()) {
                return Some((l, r));
            }
        }
        None
    }

    fn fmt_nested(&self, f: &mut Formatter<'_>, parent_prec: u8) -> std::fmt::Result {
        match self {
            Expr::BinaryExpr { left, op, right } => {
                let prec = op.precedence();
                let parens = prec < parent_prec;
                if parens {
                    write!(f, "(")?;
                }
                left.fmt_nested(f, prec)?;
                write!(f, " {} ", op)?;
                right.fmt_nested(f, prec)?;
                if parens {
                    write!(f, ")")?;
                }
                Ok(())
            }
            _ => write!(f, "{}", self),
        }
    }
}

impl TreeNode for Expr {
    fn visit_children<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        match self {
            Expr::Column(_) | Expr::Literal(_) => Ok(VisitRecursion::Continue),
            Expr::BinaryExpr { left, right, .. } => {
                f(left)?.when_sibling(|| f(right))
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } | Expr::InList { expr, .. } => f(expr),
            Expr::ScalarFunction { args, .. } => apply_each!(|e: &Arc<Expr>| f(e); args),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryExpr { .. } => self.fmt_nested(f, 0),
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", expr)
                } else {
                    write!(f, "{} IS NULL", expr)
                }
            }
            Expr::InList { expr, list, negated } => {
                let values: Vec<String> = list.iter().map(|v| v.to_string()).collect();
                if *negated {
                    write!(f, "{} NOT IN ({})", expr, values.join(", "))
                } else {
                    write!(f, "{} IN ({})", expr, values.join(", "))
                }
            }
            Expr::ScalarFunction { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
        }
    }
}
