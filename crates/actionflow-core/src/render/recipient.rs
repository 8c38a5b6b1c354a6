//! Recipient list parsing and address validation for email actions.

use thiserror::Error;

use super::template::{RenderContext, RenderError, render};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid email address '{address}': {reason}")]
pub struct AddressError {
    pub address: String,
    pub reason: &'static str,
}

/// Render a comma-separated recipient template into a de-duplicated list.
///
/// Entries are trimmed, empty entries dropped, and the first occurrence of a
/// duplicate wins its position.
pub fn render_recipients(
    template: &str,
    ctx: &RenderContext<'_>,
) -> Result<Vec<String>, RenderError> {
    let rendered = render(template, ctx)?;
    let mut out: Vec<String> = Vec::new();
    for entry in rendered.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|seen| seen == entry) {
            out.push(entry.to_string());
        }
    }
    Ok(out)
}

/// Basic structural check: exactly one `@`, non-empty local and domain parts,
/// no whitespace.
pub fn validate_address(addr: &str) -> Result<(), AddressError> {
    let fail = |reason: &'static str| -> Result<(), AddressError> {
        Err(AddressError {
            address: addr.to_string(),
            reason,
        })
    };

    if addr.chars().any(char::is_whitespace) {
        return fail("contains whitespace");
    }
    let mut parts = addr.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return fail("must contain exactly one '@'"),
    };
    if local.is_empty() {
        return fail("empty local part");
    }
    if domain.is_empty() {
        return fail("empty domain");
    }
    Ok(())
}
