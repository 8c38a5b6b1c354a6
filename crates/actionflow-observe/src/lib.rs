//! Observability for Actionflow: subscriber setup and span naming.

pub mod attrs;
pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
