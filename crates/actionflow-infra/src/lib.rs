//! Infrastructure layer for Actionflow.
//!
//! Implements the ports defined in `actionflow-core`: the SQLite-backed
//! durable stream, file and HTTP metadata catalogs, the HTTP entity resolver
//! and the action handlers that perform the actual side effects. Also owns
//! configuration discovery.

pub mod catalog;
pub mod config;
pub mod entity;
pub mod handlers;
pub mod http;
pub mod sqlite;
