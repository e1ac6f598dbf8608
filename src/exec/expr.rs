use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::catalog::types::Value;
use crate::error::{Error, Result};
use crate::plan::expr::{Expr, Operator};
use crate::plan::schema::PlanSchema;

/// An expression compiled against a concrete input schema: column names are
/// resolved to row offsets and function names to engine builtins, so
/// evaluation is a pure walk with no lookups.
#[derive(Debug)]
pub enum PhysicalExpr {
    Column(usize),
    Literal(Value),
    Binary {
        left: Box<PhysicalExpr>,
        op: Operator,
        right: Box<PhysicalExpr>,
    },
    Not(Box<PhysicalExpr>),
    IsNull {
        expr: Box<PhysicalExpr>,
        negated: bool,
    },
    // The membership set is ordered rather than hashed: Value equates
    // Integer(1) with Float(1.0), and only Ord agrees with that.
    InList {
        expr: Box<PhysicalExpr>,
        set: BTreeSet<Value>,
        negated: bool,
    },
    Function {
        builtin: Builtin,
        args: Vec<PhysicalExpr>,
    },
}

/// Scalar functions the engine itself can evaluate. Anything a source
/// declares beyond these must be pushed down or the query is rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Builtin {
    Upper,
    Lower,
    Abs,
    Length,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Builtin> {
        match name.to_lowercase().as_str() {
            "upper" => Some(Builtin::Upper),
            "lower" => Some(Builtin::Lower),
            "abs" => Some(Builtin::Abs),
            "length" => Some(Builtin::Length),
            _ => None,
        }
    }
}

/// Resolve an expression against the schema of the rows it will see.
pub fn compile(expr: &Expr, schema: &PlanSchema) -> Result<PhysicalExpr> {
    Ok(match expr {
        Expr::Column(c) => {
            PhysicalExpr::Column(schema.index_of(c.relation.as_ref(), &c.name)?)
        }
        Expr::Literal(v) => PhysicalExpr::Literal(v.clone()),
        Expr::BinaryExpr { left, op, right } => PhysicalExpr::Binary {
            left: Box::new(compile(left, schema)?),
            op: *op,
            right: Box::new(compile(right, schema)?),
        },
        Expr::Not(inner) => PhysicalExpr::Not(Box::new(compile(inner, schema)?)),
        Expr::IsNull { expr, negated } => PhysicalExpr::IsNull {
            expr: Box::new(compile(expr, schema)?),
            negated: *negated,
        },
        Expr::InList { expr, list, negated } => PhysicalExpr::InList {
            expr: Box::new(compile(expr, schema)?),
            set: list.iter().cloned().collect(),
            negated: *negated,
        },
        Expr::ScalarFunction { name, args } => {
            let builtin = Builtin::from_name(name)
                .ok_or_else(|| Error::value(format!("unknown function {}", name)))?;
            let args = args
                .iter()
                .map(|a| compile(a, schema))
                .collect::<Result<Vec<_>>>()?;
            PhysicalExpr::Function { builtin, args }
        }
    })
}

impl PhysicalExpr {
    pub fn evaluate(&self, row: &[Value]) -> Result<Value> {
        Ok(match self {
            PhysicalExpr::Column(i) => row.get(*i).cloned().ok_or_else(|| {
                Error::internal(format!("row has no column at offset {}", i))
            })?,
            PhysicalExpr::Literal(v) => v.clone(),
            PhysicalExpr::Binary { left, op, right } => {
                let l = left.evaluate(row)?;
                let r = right.evaluate(row)?;
                eval_binary(*op, l, r)?
            }
            PhysicalExpr::Not(inner) => match inner.evaluate(row)? {
                Value::Null => Value::Null,
                Value::Boolean(b) => Value::Boolean(!b),
                other => {
                    return Err(Error::value(format!("NOT applied to non-boolean {}", other)))
                }
            },
            PhysicalExpr::IsNull { expr, negated } => {
                let is_null = expr.evaluate(row)?.is_null();
                Value::Boolean(is_null != *negated)
            }
            PhysicalExpr::InList { expr, set, negated } => {
                let v = expr.evaluate(row)?;
                if v.is_null() {
                    Value::Null
                } else {
                    Value::Boolean(set.contains(&v) != *negated)
                }
            }
            PhysicalExpr::Function { builtin, args } => {
                let args = args
                    .iter()
                    .map(|a| a.evaluate(row))
                    .collect::<Result<Vec<_>>>()?;
                eval_builtin(*builtin, &args)?
            }
        })
    }
}

/// Whether a predicate result keeps a row. SQL semantics: NULL filters out.
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Boolean(true))
}

fn eval_binary(op: Operator, l: Value, r: Value) -> Result<Value> {
    use Operator::*;
    match op {
        And | Or => eval_logic(op, l, r),
        Eq | NotEq | Lt | LtEq | Gt | GtEq => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ord = l.cmp(&r);
            let out = match op {
                Eq => ord == Ordering::Equal,
                NotEq => ord != Ordering::Equal,
                Lt => ord == Ordering::Less,
                LtEq => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                GtEq => ord != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Boolean(out))
        }
        Plus | Minus | Multiply | Divide => eval_arithmetic(op, l, r),
    }
}

// Three-valued AND/OR.
fn eval_logic(op: Operator, l: Value, r: Value) -> Result<Value> {
    let to_opt = |v: &Value| match v {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(Error::value(format!("{} applied to non-boolean {}", op, other))),
    };
    let (l, r) = (to_opt(&l)?, to_opt(&r)?);
    let out = match op {
        Operator::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Operator::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };
    Ok(out.map(Value::Boolean).unwrap_or(Value::Null))
}

fn eval_arithmetic(op: Operator, l: Value, r: Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (l, r) {
        (Value::Integer(l), Value::Integer(r)) => match op {
            Operator::Plus => checked_int(l.checked_add(r)),
            Operator::Minus => checked_int(l.checked_sub(r)),
            Operator::Multiply => checked_int(l.checked_mul(r)),
            Operator::Divide => {
                if r == 0 {
                    return Err(Error::value("division by zero"));
                }
                Ok(Value::Float(l as f64 / r as f64))
            }
            _ => unreachable!(),
        },
        (l, r) => {
            let (l, r) = (as_float(&l)?, as_float(&r)?);
            match op {
                Operator::Plus => Ok(Value::Float(l + r)),
                Operator::Minus => Ok(Value::Float(l - r)),
                Operator::Multiply => Ok(Value::Float(l * r)),
                Operator::Divide => {
                    if r == 0.0 {
                        return Err(Error::value("division by zero"));
                    }
                    Ok(Value::Float(l / r))
                }
                _ => unreachable!(),
            }
        }
    }
}

fn checked_int(v: Option<i64>) -> Result<Value> {
    v.map(Value::Integer).ok_or_else(|| Error::value("integer overflow"))
}

fn as_float(v: &Value) -> Result<f64> {
    match v {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(Error::value(format!("{} is not numeric", other))),
    }
}

fn eval_builtin(builtin: Builtin, args: &[Value]) -> Result<Value> {
    let arg = args
        .first()
        .ok_or_else(|| Error::value("function called with no arguments"))?;
    if arg.is_null() {
        return Ok(Value::Null);
    }
    match (builtin, arg) {
        (Builtin::Upper, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        (Builtin::Lower, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (Builtin::Length, Value::String(s)) => Ok(Value::Integer(s.chars().count() as i64)),
        (Builtin::Abs, Value::Integer(i)) => Ok(Value::Integer(i.abs())),
        (Builtin::Abs, Value::Float(f)) => Ok(Value::Float(f.abs())),
        (builtin, arg) => {
            Err(Error::value(format!("{:?} not defined for {}", builtin, arg.datatype())))
        }
    }
}
