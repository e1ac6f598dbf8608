use std::fmt::{Display, Formatter};

use crate::catalog::types::Value;
use crate::exec::Row;
use crate::plan::schema::PlanSchema;

/// Fully materialized query result, mainly for tests and diagnostics; the
/// streaming path is [`ExecutionPlan::poll`](crate::exec::ExecutionPlan).
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub schema: PlanSchema,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(schema: PlanSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in deterministic order for set comparisons in tests.
    pub fn sorted_rows(&self) -> Vec<Row> {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = x.cmp(y);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        });
        rows
    }
}

impl Display for ResultSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let header: Vec<String> =
            self.schema.symbols.iter().map(|s| s.qualified_name()).collect();
        let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(Value::to_string).collect())
            .collect();
        for row in &rendered {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() && cell.len() > widths[i] {
                    widths[i] = cell.len();
                }
            }
        }
        let line = |f: &mut Formatter<'_>, cells: &[String]| -> std::fmt::Result {
            let mut first = true;
            for (i, cell) in cells.iter().enumerate() {
                if !first {
                    write!(f, " | ")?;
                }
                first = false;
                write!(f, "{:width$}", cell, width = widths.get(i).copied().unwrap_or(0))?;
            }
            writeln!(f)
        };
        line(f, &header)?;
        let total: usize =
            widths.iter().sum::<usize>() + widths.len().saturating_sub(1) * 3;
        writeln!(f, "{}", "-".repeat(total))?;
        for row in &rendered {
            line(f, row)?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::DataType;
    use crate::plan::schema::Symbol;

    #[test]
    fn test_table_rendering() {
        let schema = PlanSchema::new(vec![
            Symbol::new(None, "k", DataType::Integer, false),
            Symbol::new(None, "name", DataType::String, true),
        ]);
        let rs = ResultSet::new(
            schema,
            vec![
                vec![1.into(), "ada".into()],
                vec![2.into(), "grace".into()],
            ],
        );
        assert_eq!(
            rs.to_string(),
            "k | name   \n\
             -----------\n\
             1 | 'ada'  \n\
             2 | 'grace'\n\
             (2 rows)"
        );
    }
}
