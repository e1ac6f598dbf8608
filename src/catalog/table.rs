use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::catalog::capability::SourceId;
use crate::catalog::types::DataType;
use crate::error::Error;
use crate::error::Result;

/// A single column of a base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Column {
        Column { name: name.into(), datatype, nullable: true }
    }

    pub fn not_null(mut self) -> Column {
        self.nullable = false;
        self
    }
}

/// Source-supplied statistics for a base table. fedql never collects
/// statistics itself; they arrive with the table registration and feed the
/// cardinality estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    /// Total row count, if the source reports one.
    pub row_count: Option<u64>,
    /// Per-column distinct value counts, keyed by column name.
    pub distinct_counts: BTreeMap<String, u64>,
}

impl TableStatistics {
    pub fn new(row_count: u64) -> TableStatistics {
        TableStatistics { row_count: Some(row_count), distinct_counts: BTreeMap::new() }
    }

    pub fn distinct(mut self, column: impl Into<String>, count: u64) -> TableStatistics {
        self.distinct_counts.insert(column.into(), count);
        self
    }

    pub fn distinct_count(&self, column: &str) -> Option<u64> {
        self.distinct_counts.get(column).copied()
    }
}

/// Table holds metadata about a base table on some source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Table columns
    pub columns: Vec<Column>,
    /// Source-reported statistics
    pub statistics: TableStatistics,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Table {
        Table { name: name.into(), columns, statistics: TableStatistics::default() }
    }

    pub fn with_statistics(mut self, statistics: TableStatistics) -> Table {
        self.statistics = statistics;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::value("Table name can't be empty"));
        }
        if self.columns.is_empty() {
            return Err(Error::value(format!("Table {} has no columns", self.name)));
        }
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::value(format!(
                    "Duplicate column {} in table {}",
                    column.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The catalog binds table names to their owning source and metadata. It is
/// populated at registration time and read-only during planning; plan trees
/// arriving from the external binder reference tables registered here.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: BTreeMap<String, (SourceId, Arc<Table>)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { tables: BTreeMap::new() }
    }

    /// Register a table as owned by the given source.
    pub fn register(&mut self, source: impl Into<SourceId>, table: Table) -> Result<()> {
        table.validate()?;
        let source = source.into();
        if self.tables.contains_key(&table.name) {
            return Err(Error::value(format!("Table {} already registered", table.name)));
        }
        self.tables.insert(table.name.clone(), (source, Arc::new(table)));
        Ok(())
    }

    /// Gets a table and its owning source, if registered.
    pub fn get(&self, name: &str) -> Option<(&SourceId, &Arc<Table>)> {
        self.tables.get(name).map(|(s, t)| (s, t))
    }

    /// Gets a table, and errors if it does not exist.
    pub fn must_get(&self, name: &str) -> Result<(&SourceId, &Arc<Table>)> {
        self.get(name).ok_or_else(|| Error::value(format!("Table {} does not exist", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let ok = Table::new("t", vec![Column::new("a", DataType::Integer)]);
        assert!(ok.validate().is_ok());

        let empty = Table::new("t", vec![]);
        assert!(empty.validate().is_err());

        let dup = Table::new(
            "t",
            vec![Column::new("a", DataType::Integer), Column::new("a", DataType::String)],
        );
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_register_and_lookup() -> Result<()> {
        let mut catalog = Catalog::new();
        let stats = TableStatistics::new(500).distinct("k", 120);
        let table = Table::new("t1", vec![Column::new("k", DataType::Integer)])
            .with_statistics(stats);
        catalog.register("a", table)?;

        let (source, table) = catalog.must_get("t1")?;
        assert_eq!(source.as_str(), "a");
        assert_eq!(table.statistics.row_count, Some(500));
        assert_eq!(table.statistics.distinct_count("k"), Some(120));
        assert!(catalog.must_get("missing").is_err());
        Ok(())
    }
}
