use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::catalog::table::Table;
use crate::catalog::types::DataType;
use crate::error::{Error, Result};

/// A (possibly qualified) reference to a base relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableReference(Arc<str>);

impl TableReference {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TableReference(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableReference {
    fn from(value: &str) -> Self {
        TableReference::new(value)
    }
}

impl Display for TableReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An output column of a plan node. Carries the optional distinct count so
/// the estimator can size key harvests without a catalog round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub relation: Option<TableReference>,
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub distinct_count: Option<u64>,
}

impl Symbol {
    pub fn new(
        relation: Option<TableReference>,
        name: impl Into<String>,
        datatype: DataType,
        nullable: bool,
    ) -> Self {
        Self { relation, name: name.into(), datatype, nullable, distinct_count: None }
    }

    pub fn with_distinct_count(mut self, distinct_count: u64) -> Self {
        self.distinct_count = Some(distinct_count);
        self
    }

    /// The qualified name, e.g. `orders.user_id`, or the bare name when the
    /// symbol has no relation qualifier.
    pub fn qualified_name(&self) -> String {
        match &self.relation {
            Some(relation) => format!("{}.{}", relation, self.name),
            None => self.name.clone(),
        }
    }

    fn matches(&self, relation: Option<&TableReference>, name: &str) -> bool {
        if self.name != name {
            return false;
        }
        match relation {
            Some(relation) => self.relation.as_ref() == Some(relation),
            None => true,
        }
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// The resolved output schema of a plan node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanSchema {
    pub symbols: Vec<Symbol>,
}

impl PlanSchema {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self { symbols }
    }

    /// Build the schema a scan of `table` produces, qualifying every column
    /// with the table name and attaching catalog distinct counts.
    pub fn from_table(table: &Table) -> Self {
        let relation = TableReference::new(table.name.as_str());
        let symbols = table
            .columns
            .iter()
            .map(|c| {
                let mut sym =
                    Symbol::new(Some(relation.clone()), c.name.as_str(), c.datatype, c.nullable);
                if let Some(n) = table.statistics.distinct_count(&c.name) {
                    sym = sym.with_distinct_count(n);
                }
                sym
            })
            .collect();
        Self { symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Find the output position of a column. An unqualified name matches any
    /// relation but must be unambiguous.
    pub fn index_of(&self, relation: Option<&TableReference>, name: &str) -> Result<usize> {
        let mut found = None;
        for (i, sym) in self.symbols.iter().enumerate() {
            if sym.matches(relation, name) {
                if found.is_some() {
                    return Err(Error::internal(format!("ambiguous column {}", name)));
                }
                found = Some(i);
            }
        }
        found.ok_or_else(|| match relation {
            Some(relation) => Error::internal(format!("no column {}.{}", relation, name)),
            None => Error::internal(format!("no column {}", name)),
        })
    }

    pub fn symbol(&self, relation: Option<&TableReference>, name: &str) -> Result<&Symbol> {
        let i = self.index_of(relation, name)?;
        Ok(&self.symbols[i])
    }

    /// Concatenate with another schema, left columns first. Used for join
    /// outputs.
    pub fn join(&self, right: &PlanSchema) -> PlanSchema {
        let mut symbols = self.symbols.clone();
        symbols.extend(right.symbols.iter().cloned());
        PlanSchema::new(symbols)
    }
}

impl Display for PlanSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cols: Vec<String> = self.symbols.iter().map(|s| s.qualified_name()).collect();
        write!(f, "[{}]", cols.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::{Column, Table, TableStatistics};

    fn orders() -> Table {
        Table::new(
            "orders",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("user_id", DataType::Integer),
                Column::new("amount", DataType::Float),
            ],
        )
        .with_statistics(TableStatistics::new(1000).distinct("user_id", 120))
    }

    #[test]
    fn test_from_table_qualifies_and_carries_stats() -> Result<()> {
        let schema = PlanSchema::from_table(&orders());
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.symbols[0].qualified_name(), "orders.id");
        assert!(!schema.symbols[0].nullable);
        let user_id = schema.symbol(None, "user_id")?;
        assert_eq!(user_id.distinct_count, Some(120));
        Ok(())
    }

    #[test]
    fn test_index_of_qualified_and_bare() -> Result<()> {
        let schema = PlanSchema::from_table(&orders());
        let rel = TableReference::from("orders");
        assert_eq!(schema.index_of(Some(&rel), "amount")?, 2);
        assert_eq!(schema.index_of(None, "amount")?, 2);
        assert!(schema.index_of(None, "missing").is_err());
        Ok(())
    }

    #[test]
    fn test_join_detects_ambiguity() {
        let schema = PlanSchema::from_table(&orders());
        let joined = schema.join(&schema);
        assert_eq!(joined.len(), 6);
        // Bare lookup is ambiguous once both sides expose the column.
        assert!(joined.index_of(None, "id").is_err());
    }
}
