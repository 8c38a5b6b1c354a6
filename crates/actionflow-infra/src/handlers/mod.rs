//! Action handlers, one per action type.

mod request;
pub mod api_call;
pub mod email;
pub mod publish;
pub mod signature;
pub mod webhook;

pub use api_call::ApiCallHandler;
pub use email::{EmailHandler, RenderedEmail};
pub use publish::PublishHandler;
pub use webhook::WebhookHandler;

/// Filter directive that keeps simulated deliveries (logged at `info`)
/// visible when the global level is quieter.
pub const SIMULATION_LOG_DIRECTIVE: &str = "actionflow_infra::handlers=info";
