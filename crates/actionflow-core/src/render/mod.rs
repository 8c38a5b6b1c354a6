//! Template rendering against entity snapshots and step parameters.

pub mod recipient;
pub mod template;

pub use recipient::{AddressError, render_recipients, validate_address};
pub use template::{RenderContext, RenderError, is_template, render};
