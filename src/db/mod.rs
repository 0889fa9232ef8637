//! Database layer: schema setup and row decoding.

pub mod converters;
pub mod schema;
