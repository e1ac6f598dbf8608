//! fedql is a query federation planner: given a bound relational plan tree
//! whose base tables live on multiple, independently-capable data sources, it
//! pushes as much work as each source can legally perform down into per-source
//! `Access` nodes, converts cross-source equality joins into staged *dependent
//! joins* (key values harvested from the smaller side are injected as an
//! IN-list filter into the query sent to the other side), and executes the
//! finalized plan with a pull-based engine.
//!
//! The crate is organized leaf-first:
//!
//! - [`catalog`]: data types, table metadata with statistics, and the
//!   per-source capability registry.
//! - [`plan`]: the immutable plan node IR, predicate expressions, and the
//!   explain/diagnostics tree.
//! - [`planner`]: the decomposition planner, cardinality estimator, and
//!   dependent join planner.
//! - [`exec`]: the pull-based execution engine, source connectors, and the
//!   dependent join state machine.
//!
//! Parsing SQL text into the initial plan tree and rendering per-source
//! sub-plans into native command text are external collaborators; fedql
//! consumes bound trees and hands finalized `Access` subtrees to
//! [`exec::source::Connector`] implementations.

pub mod error;

pub mod config;

pub mod catalog;
pub mod exec;
pub mod plan;
pub mod planner;
