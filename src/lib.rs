//! Schema Tracker
//!
//! Captures point-in-time snapshots of a PostgreSQL schema, keeps them in a
//! durable history and reports structural differences between any two of them.

pub mod config;
pub mod error;
pub mod filter;
pub mod introspection;
pub mod routes;
pub mod snapshot;
pub mod state;
