use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Formatter;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;

/// Identifies a registered data source.
#[derive(Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(id: &str) -> SourceId {
        SourceId(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        SourceId(Arc::from(s))
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kinds of relational operators a source may be able to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    Scan,
    Filter,
    Project,
    Sort,
    Join,
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OperatorKind::Scan => "Scan",
            OperatorKind::Filter => "Filter",
            OperatorKind::Project => "Project",
            OperatorKind::Sort => "Sort",
            OperatorKind::Join => "Join",
        })
    }
}

/// What a single source can execute. Created at registration time, immutable
/// thereafter; planning only reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Operator kinds the source can run natively.
    operators: HashSet<OperatorKind>,
    /// Scalar function names the source can evaluate, lower-cased.
    functions: HashSet<String>,
    pub supports_subquery: bool,
    pub supports_in_list: bool,
    /// Maximum number of values in an IN-list predicate; 0 means unbounded.
    pub max_in_list_size: usize,
}

impl CapabilityDescriptor {
    pub fn supports_operator(&self, kind: OperatorKind) -> bool {
        self.operators.contains(&kind)
    }

    pub fn supports_function(&self, name: &str) -> bool {
        self.functions.contains(&name.to_ascii_lowercase())
    }

    /// The IN-list bound, `None` when the source declared no limit.
    pub fn max_in_list(&self) -> Option<usize> {
        if self.max_in_list_size == 0 {
            None
        } else {
            Some(self.max_in_list_size)
        }
    }
}

/// Builder for [`CapabilityDescriptor`] with a fluent interface.
pub struct CapabilityDescriptorBuilder {
    operators: HashSet<OperatorKind>,
    functions: HashSet<String>,
    supports_subquery: bool,
    supports_in_list: bool,
    max_in_list_size: usize,
}

impl CapabilityDescriptorBuilder {
    pub fn new() -> Self {
        Self {
            operators: HashSet::new(),
            functions: HashSet::new(),
            supports_subquery: false,
            supports_in_list: false,
            max_in_list_size: 0,
        }
    }

    pub fn operator(mut self, kind: OperatorKind) -> Self {
        self.operators.insert(kind);
        self
    }

    pub fn operators(mut self, kinds: impl IntoIterator<Item = OperatorKind>) -> Self {
        self.operators.extend(kinds);
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(name.into().to_ascii_lowercase());
        self
    }

    pub fn supports_subquery(mut self) -> Self {
        self.supports_subquery = true;
        self
    }

    pub fn supports_in_list(mut self, max_size: usize) -> Self {
        self.supports_in_list = true;
        self.max_in_list_size = max_size;
        self
    }

    pub fn build(self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            operators: self.operators,
            functions: self.functions,
            supports_subquery: self.supports_subquery,
            supports_in_list: self.supports_in_list,
            max_in_list_size: self.max_in_list_size,
        }
    }
}

impl Default for CapabilityDescriptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-source capability lookups backing push-down decisions.
///
/// Registration replaces the descriptor `Arc` wholesale, so in-flight plans
/// holding a snapshot keep seeing a consistent descriptor. Lookups against an
/// unknown source report zero capabilities, which forces all work onto the
/// engine side rather than failing.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    sources: RwLock<HashMap<SourceId, Arc<CapabilityDescriptor>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self { sources: RwLock::new(HashMap::new()) }
    }

    /// Register (or replace) the descriptor for a source.
    pub fn register(&self, source: impl Into<SourceId>, descriptor: CapabilityDescriptor) {
        let mut sources = self.sources.write().unwrap_or_else(|p| p.into_inner());
        sources.insert(source.into(), Arc::new(descriptor));
    }

    /// Snapshot a source's descriptor.
    pub fn descriptor(&self, source: &SourceId) -> Option<Arc<CapabilityDescriptor>> {
        let sources = self.sources.read().unwrap_or_else(|p| p.into_inner());
        sources.get(source).cloned()
    }

    pub fn can_execute(&self, source: &SourceId, kind: OperatorKind) -> bool {
        self.descriptor(source).map(|d| d.supports_operator(kind)).unwrap_or(false)
    }

    pub fn supports_function(&self, source: &SourceId, name: &str) -> bool {
        self.descriptor(source).map(|d| d.supports_function(name)).unwrap_or(false)
    }

    pub fn supports_in_list(&self, source: &SourceId) -> bool {
        self.descriptor(source).map(|d| d.supports_in_list).unwrap_or(false)
    }

    pub fn max_in_list(&self, source: &SourceId) -> Option<usize> {
        self.descriptor(source).and_then(|d| d.max_in_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_like() -> CapabilityDescriptor {
        CapabilityDescriptorBuilder::new()
            .operators([
                OperatorKind::Scan,
                OperatorKind::Filter,
                OperatorKind::Project,
                OperatorKind::Join,
            ])
            .function("UPPER")
            .supports_in_list(100)
            .build()
    }

    #[test]
    fn test_lookups() {
        let registry = CapabilityRegistry::new();
        registry.register("pg", sql_like());

        let pg = SourceId::new("pg");
        assert!(registry.can_execute(&pg, OperatorKind::Join));
        assert!(!registry.can_execute(&pg, OperatorKind::Sort));
        // function names are case-insensitive
        assert!(registry.supports_function(&pg, "upper"));
        assert!(!registry.supports_function(&pg, "lower"));
        assert_eq!(registry.max_in_list(&pg), Some(100));
    }

    #[test]
    fn test_unknown_source_has_zero_capabilities() {
        let registry = CapabilityRegistry::new();
        let unknown = SourceId::new("nope");
        assert!(!registry.can_execute(&unknown, OperatorKind::Scan));
        assert!(!registry.supports_function(&unknown, "abs"));
        assert!(!registry.supports_in_list(&unknown));
        assert_eq!(registry.max_in_list(&unknown), None);
    }

    #[test]
    fn test_register_replaces_snapshot() {
        let registry = CapabilityRegistry::new();
        registry.register("s", sql_like());
        let s = SourceId::new("s");
        let before = registry.descriptor(&s).unwrap();

        registry.register("s", CapabilityDescriptorBuilder::new().operator(OperatorKind::Scan).build());
        // The old snapshot is untouched; new lookups see the replacement.
        assert!(before.supports_operator(OperatorKind::Join));
        assert!(!registry.can_execute(&s, OperatorKind::Join));
    }

    #[test]
    fn test_unbounded_in_list() {
        let registry = CapabilityRegistry::new();
        registry.register(
            "mem",
            CapabilityDescriptorBuilder::new().operator(OperatorKind::Scan).supports_in_list(0).build(),
        );
        let mem = SourceId::new("mem");
        assert!(registry.supports_in_list(&mem));
        assert_eq!(registry.max_in_list(&mem), None);
    }
}
