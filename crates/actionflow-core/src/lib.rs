//! Business logic and collaborator trait definitions for Actionflow.
//!
//! This crate defines the "ports" (catalog, entity resolver, message channel)
//! that the infrastructure layer implements, plus the orchestrator and the
//! executor runtime that drive them. It depends on `actionflow-types` (and
//! `actionflow-observe` for span names) -- never on `actionflow-infra` or
//! any database/IO crate.

pub mod channel;
pub mod executor;
pub mod orchestrator;
pub mod ports;
pub mod render;
