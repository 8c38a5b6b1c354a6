//! Shared domain types for Actionflow.
//!
//! This crate contains the types that flow between the orchestrator, the
//! message channel and the action executors: workflow definitions, action
//! templates, attribute maps, the `Task` wire envelope, configuration, and
//! the error enums shared by the collaborator ports.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! secrecy.

pub mod action;
pub mod attribute;
pub mod config;
pub mod error;
pub mod task;
pub mod workflow;
