//! HTTP trigger surface.
//!
//! Axum router exposing workflow triggers and stream inspection, with the
//! envelope response format shared by every route.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
