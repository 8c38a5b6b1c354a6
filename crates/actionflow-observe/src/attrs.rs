//! Span names shared across Actionflow.
//!
//! Span names are `actionflow.<operation>`. Fields on these spans use the
//! same prefix (`actionflow.workflow_id`, `actionflow.trigger_id`,
//! `actionflow.step_index`, `actionflow.task_id`, `actionflow.action_type`,
//! `actionflow.attempt`, `actionflow.durable`) so one task can be followed
//! from the trigger that published it to the executor that ran it.

/// One `trigger_workflow` call.
pub const SPAN_TRIGGER: &str = "actionflow.trigger";

/// One delivery processed by an executor.
pub const SPAN_EXECUTE: &str = "actionflow.execute";

/// One inbound HTTP request on the trigger server.
pub const SPAN_HTTP_REQUEST: &str = "actionflow.http.request";

/// One executor process consuming a durable.
pub const SPAN_EXECUTOR: &str = "actionflow.executor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_prefix() {
        for name in [SPAN_TRIGGER, SPAN_EXECUTE, SPAN_HTTP_REQUEST, SPAN_EXECUTOR] {
            assert!(name.starts_with("actionflow."), "{name}");
        }
    }
}
