//! Service and per-request configuration.

pub mod schema;

pub use schema::{TiConfig, TiConfigBody, TiServiceConfig, VisualizationConfig};
