use serde::Deserialize;

use crate::error::Result;

/// Planner and engine tunables.
///
/// The heuristic constants here (selectivities, batch ceilings) are
/// deliberately configuration, not hard-coded: they only need to produce a
/// consistent ordering for join-side choice, and deployments tune them per
/// source mix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: String,

    /// Row count assumed for a base table with no statistics.
    pub default_table_rows: f64,
    /// Selectivity assumed for a filter predicate with no usable statistics.
    pub default_selectivity: f64,
    /// Upper bound on dependent-join batch size when the dependent source
    /// declares no IN-list limit, bounding harvested-key memory.
    pub dependent_batch_ceiling: usize,

    /// Number of worker threads shared by concurrently-executing sub-plans.
    pub workers: usize,
    /// Per sub-plan execution timeout in milliseconds; 0 disables.
    pub subplan_timeout_ms: u64,
    /// Number of rows an executor yields per poll.
    pub vector_size: usize,
}

impl Config {
    pub fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("log_level", "debug")?
            .set_default("default_table_rows", 1000.0)?
            .set_default("default_selectivity", 0.2)?
            .set_default("dependent_batch_ceiling", 1024)?
            .set_default("workers", 4)?
            .set_default("subplan_timeout_ms", 30_000)?
            .set_default("vector_size", 1024)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("FEDQL"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        // The builder defaults above are the source of truth; they only fail
        // on malformed overrides, which the empty-file path cannot hit.
        Config::new("").unwrap_or(Config {
            log_level: "debug".to_string(),
            default_table_rows: 1000.0,
            default_selectivity: 0.2,
            dependent_batch_ceiling: 1024,
            workers: 4,
            subplan_timeout_ms: 30_000,
            vector_size: 1024,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() -> Result<()> {
        let cfg = Config::new("")?;
        assert_eq!(cfg.dependent_batch_ceiling, 1024);
        assert_eq!(cfg.workers, 4);
        assert!(cfg.default_selectivity > 0.0 && cfg.default_selectivity <= 1.0);
        Ok(())
    }
}
