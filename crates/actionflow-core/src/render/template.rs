//! `{{ Root.field }}` template rendering.
//!
//! Two roots exist: `Entity` (the trigger's entity snapshot) and `Params`
//! (the step's parameters). Expressions tolerate surrounding whitespace and a
//! leading dot, so `{{Entity.name}}`, `{{ Entity.name }}` and
//! `{{.Entity.name}}` are equivalent.

use actionflow_types::attribute::AttributeMap;
use actionflow_types::task::Task;
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Errors from rendering a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The template references a context object that is not present.
    #[error("template references {0} but no {0} context is available")]
    MissingContext(&'static str),

    /// The expression root is neither `Entity` nor `Params`.
    #[error("unknown template root '{0}'")]
    UnknownRoot(String),

    /// Unterminated `{{`, or an expression without a root and field.
    #[error("malformed template expression: {0}")]
    Malformed(String),
}

/// The data a template is rendered against.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext<'a> {
    pub entity: Option<&'a AttributeMap>,
    pub params: Option<&'a AttributeMap>,
}

impl<'a> RenderContext<'a> {
    pub fn new(entity: Option<&'a AttributeMap>, params: Option<&'a AttributeMap>) -> Self {
        Self { entity, params }
    }

    /// Context used by executors: the task's entity snapshot plus its params.
    pub fn for_task(task: &'a Task) -> Self {
        Self {
            entity: task.entity.as_ref(),
            params: Some(&task.params),
        }
    }
}

/// Render `template` against `ctx`.
///
/// A missing leaf inside a present context renders as the empty string.
pub fn render(template: &str, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| {
            RenderError::Malformed(format!("unterminated '{{{{' in '{}'", snippet(&rest[start..])))
        })?;
        let expr = &after_open[..end];
        out.push_str(&evaluate(expr, ctx)?);
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Whether `s` contains any template expression marker.
pub fn is_template(s: &str) -> bool {
    s.contains(OPEN)
}

fn evaluate(expr: &str, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
    let trimmed = expr.trim();
    let path = trimmed.strip_prefix('.').unwrap_or(trimmed);

    let (root, field) = path
        .split_once('.')
        .map(|(r, f)| (r.trim(), f.trim()))
        .ok_or_else(|| RenderError::Malformed(format!("expected Root.field, got '{trimmed}'")))?;

    if root.is_empty() || field.is_empty() {
        return Err(RenderError::Malformed(format!(
            "expected Root.field, got '{trimmed}'"
        )));
    }

    let map = match root {
        "Entity" => ctx.entity.ok_or(RenderError::MissingContext("Entity"))?,
        "Params" => ctx.params.ok_or(RenderError::MissingContext("Params"))?,
        other => return Err(RenderError::UnknownRoot(other.to_string())),
    };

    Ok(map.get(field).map(|v| v.to_string()).unwrap_or_default())
}

fn snippet(s: &str) -> &str {
    match s.char_indices().nth(32) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
