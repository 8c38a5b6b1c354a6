//! Dot-separated subjects and wildcard filters.
//!
//! `*` matches exactly one token; `>` matches one or more trailing tokens and
//! may only appear last.

use super::ChannelError;

/// Validate a concrete publish subject: non-empty tokens, no wildcards.
pub fn validate_subject(subject: &str) -> Result<(), ChannelError> {
    let ok = !subject.is_empty()
        && subject
            .split('.')
            .all(|t| !t.is_empty() && t != "*" && t != ">" && !t.contains(char::is_whitespace));
    if ok {
        Ok(())
    } else {
        Err(ChannelError::InvalidSubject(subject.to_string()))
    }
}

/// Validate a filter, which may contain `*` tokens and a trailing `>`.
pub fn validate_filter(filter: &str) -> Result<(), ChannelError> {
    let tokens: Vec<&str> = filter.split('.').collect();
    let last = tokens.len().saturating_sub(1);
    let ok = !filter.is_empty()
        && tokens.iter().enumerate().all(|(i, t)| {
            !t.is_empty() && !t.contains(char::is_whitespace) && (*t != ">" || i == last)
        });
    if ok {
        Ok(())
    } else {
        Err(ChannelError::InvalidSubject(filter.to_string()))
    }
}

/// Whether `subject` is captured by `filter`.
pub fn matches(filter: &str, subject: &str) -> bool {
    let mut f = filter.split('.');
    let mut s = subject.split('.');
    loop {
        match (f.next(), s.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(ft), Some(st)) if ft == st => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether any of `filters` captures `subject`.
pub fn matches_any<S: AsRef<str>>(filters: &[S], subject: &str) -> bool {
    filters.iter().any(|f| matches(f.as_ref(), subject))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(matches("actions.email", "actions.email"));
        assert!(!matches("actions.email", "actions.webhook"));
        assert!(!matches("actions.email", "actions.email.extra"));
        assert!(!matches("actions.email.extra", "actions.email"));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(matches("actions.*", "actions.email"));
        assert!(matches("*.email", "actions.email"));
        assert!(!matches("actions.*", "actions"));
        assert!(!matches("actions.*", "actions.email.retry"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(matches("actions.>", "actions.email"));
        assert!(matches("actions.>", "actions.email.retry"));
        assert!(!matches("actions.>", "actions"));
        assert!(!matches("actions.>", "events.created"));
        assert!(matches(">", "anything.at.all"));
    }

    #[test]
    fn test_matches_any() {
        let filters = vec!["actions.>".to_string(), "events.>".to_string()];
        assert!(matches_any(&filters, "events.customer.created"));
        assert!(!matches_any(&filters, "audit.log"));
    }

    #[test]
    fn test_validation() {
        assert!(validate_subject("actions.email").is_ok());
        assert!(validate_subject("actions.*").is_err());
        assert!(validate_subject("actions..email").is_err());
        assert!(validate_subject("").is_err());
        assert!(validate_subject("bad subject").is_err());

        assert!(validate_filter("actions.>").is_ok());
        assert!(validate_filter("*.email").is_ok());
        assert!(validate_filter("actions.>.email").is_err());
        assert!(validate_filter("actions.").is_err());
    }
}
