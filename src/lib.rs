//! ti-engine: test intelligence over a persisted call graph.
//!
//! Ingests partial call graphs per commit, merges them into branch state
//! when a change lands, selects the tests a change set must run, and builds
//! bounded impact graphs for visualization.

pub mod callgraph;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod graph;
pub mod naming;
pub mod observability;
pub mod service;
pub mod types;

pub use error::{Result, TiError};
pub use service::TiService;
