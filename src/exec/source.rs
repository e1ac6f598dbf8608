use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::debug;

use crate::catalog::capability::SourceId;
use crate::catalog::types::Value;
use crate::error::{Error, Result};
use crate::exec::expr::{compile, is_true};
use crate::exec::Row;
use crate::plan::node::{JoinKind, Plan};

pub type RowStream = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// The translator boundary. A connector receives the pushed subtree of an
/// Access node, renders it however the source needs, and returns the result
/// as an opaque row stream. The engine never looks inside.
pub trait Connector: Send + Sync {
    fn execute(&self, plan: &Arc<Plan>) -> Result<RowStream>;
}

/// Maps each source to its connector. Registered once at startup, read-only
/// during execution.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<SourceId, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: impl Into<SourceId>, connector: Arc<dyn Connector>) {
        let mut connectors = self.connectors.write().unwrap_or_else(|p| p.into_inner());
        connectors.insert(source.into(), connector);
    }

    pub fn get(&self, source: &SourceId) -> Result<Arc<dyn Connector>> {
        let connectors = self.connectors.read().unwrap_or_else(|p| p.into_inner());
        connectors
            .get(source)
            .cloned()
            .ok_or_else(|| Error::source(format!("no connector for source {}", source)))
    }
}

/// In-memory connector backed by fixture tables. It interprets the pushed
/// subtree directly, keeps a log of every query it receives (so tests can
/// assert batch counts), and can simulate a slow source.
#[derive(Default)]
pub struct MemoryConnector {
    tables: HashMap<String, Vec<Row>>,
    latency: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Rendered form of every query executed, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn eval(&self, plan: &Plan) -> Result<Vec<Row>> {
        match plan {
            Plan::TableScan(scan) => self
                .tables
                .get(scan.relation.as_str())
                .cloned()
                .ok_or_else(|| Error::source(format!("no table {}", scan.relation))),
            Plan::Filter(filter) => {
                let predicate = compile(&filter.predicate, filter.input.schema())?;
                let mut rows = self.eval(&filter.input)?;
                let mut kept = Vec::new();
                for row in rows.drain(..) {
                    if is_true(&predicate.evaluate(&row)?) {
                        kept.push(row);
                    }
                }
                Ok(kept)
            }
            Plan::Projection(projection) => {
                let exprs = projection
                    .exprs
                    .iter()
                    .map(|e| compile(e, projection.input.schema()))
                    .collect::<Result<Vec<_>>>()?;
                let rows = self.eval(&projection.input)?;
                rows.iter()
                    .map(|row| exprs.iter().map(|e| e.evaluate(row)).collect())
                    .collect()
            }
            Plan::Sort(sort) => {
                let keys = sort
                    .keys
                    .iter()
                    .map(|k| compile(&k.expr, sort.input.schema()).map(|e| (e, k.asc)))
                    .collect::<Result<Vec<_>>>()?;
                let rows = self.eval(&sort.input)?;
                let mut keyed = rows
                    .into_iter()
                    .map(|row| {
                        let key = keys
                            .iter()
                            .map(|(e, _)| e.evaluate(&row))
                            .collect::<Result<Vec<Value>>>()?;
                        Ok((key, row))
                    })
                    .collect::<Result<Vec<_>>>()?;
                keyed.sort_by(|(a, _), (b, _)| {
                    for (i, (_, asc)) in keys.iter().enumerate() {
                        let ord = a[i].cmp(&b[i]);
                        let ord = if *asc { ord } else { ord.reverse() };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(keyed.into_iter().map(|(_, row)| row).collect())
            }
            Plan::Join(join) => {
                if join.kind != JoinKind::Inner {
                    return Err(Error::source("memory source executes inner joins only"));
                }
                let condition = compile(&join.condition, &join.schema)?;
                let left = self.eval(&join.left)?;
                let right = self.eval(&join.right)?;
                let mut out = Vec::new();
                for l in &left {
                    for r in &right {
                        let mut row = l.clone();
                        row.extend(r.iter().cloned());
                        if is_true(&condition.evaluate(&row)?) {
                            out.push(row);
                        }
                    }
                }
                Ok(out)
            }
            Plan::Access(_) | Plan::DependentJoin(_) => Err(Error::internal(format!(
                "{} node handed across the source boundary",
                plan.name()
            ))),
        }
    }
}

impl Connector for MemoryConnector {
    fn execute(&self, plan: &Arc<Plan>) -> Result<RowStream> {
        let rendered = plan.to_string();
        debug!("memory source executing:\n{}", rendered);
        {
            let mut queries = self.queries.lock().unwrap_or_else(|p| p.into_inner());
            queries.push(rendered);
        }
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let rows = self.eval(plan)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::{Column, Table};
    use crate::catalog::types::DataType;
    use crate::plan::expr::Expr;
    use crate::plan::node::{Filter, Projection, TableScan};

    fn users_scan() -> Arc<Plan> {
        let table = Table::new(
            "users",
            vec![Column::new("id", DataType::Integer), Column::new("name", DataType::String)],
        );
        Arc::new(TableScan::new("mem".into(), &table))
    }

    fn connector() -> MemoryConnector {
        MemoryConnector::new().table(
            "users",
            vec![
                vec![1.into(), "ada".into()],
                vec![2.into(), "grace".into()],
                vec![3.into(), "edsger".into()],
            ],
        )
    }

    #[test]
    fn test_scan_and_filter() -> Result<()> {
        let connector = connector();
        let plan = Arc::new(Filter::new(
            users_scan(),
            Expr::column("users", "id").eq(Expr::literal(2)),
        ));
        let rows: Vec<Row> = connector.execute(&plan)?.collect::<Result<_>>()?;
        assert_eq!(rows, vec![vec![Value::Integer(2), Value::String("grace".into())]]);
        assert_eq!(connector.query_count(), 1);
        Ok(())
    }

    #[test]
    fn test_projection() -> Result<()> {
        let connector = connector();
        let plan = Arc::new(Projection::try_new(
            users_scan(),
            vec![Expr::column("users", "name")],
        )?);
        let rows: Vec<Row> = connector.execute(&plan)?.collect::<Result<_>>()?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![Value::String("ada".into())]);
        Ok(())
    }

    #[test]
    fn test_missing_table_is_source_error() {
        let connector = MemoryConnector::new();
        let err = connector.execute(&users_scan()).err().unwrap();
        assert!(err.to_string().contains("source execution error"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ConnectorRegistry::new();
        registry.register("mem", Arc::new(connector()));
        assert!(registry.get(&"mem".into()).is_ok());
        assert!(registry.get(&"other".into()).is_err());
    }
}
