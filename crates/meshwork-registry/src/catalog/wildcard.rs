//! Wildcard matching for dot-delimited action/event names.
//!
//! `*` matches exactly one segment, `**` matches any number of trailing or
//! infix segments. Event lookup is bidirectional: a handler registered as
//! `user.*` matches an emitted `user.created`, and a handler registered as
//! `user.created` matches a broadcast using the pattern `user.*`.

/// Matches a concrete dotted name against a pattern.
///
/// # Example
///
/// ```
/// use meshwork_registry::catalog::match_pattern;
///
/// assert!(match_pattern("user.created", "user.*"));
/// assert!(match_pattern("user.profile.updated", "user.**"));
/// assert!(match_pattern("anything.at.all", "**"));
/// assert!(!match_pattern("user.created", "post.*"));
/// ```
pub fn match_pattern(text: &str, pattern: &str) -> bool {
    if text == pattern {
        return true;
    }
    let text_segs: Vec<&str> = text.split('.').collect();
    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    match_segments(&text_segs, &pattern_segs)
}

/// Bidirectional match used by the event catalog: either side may carry the
/// wildcards.
pub fn names_match(a: &str, b: &str) -> bool {
    match_pattern(a, b) || match_pattern(b, a)
}

fn match_segments(text: &[&str], pattern: &[&str]) -> bool {
    match (text.first(), pattern.first()) {
        (_, Some(&"**")) => {
            // `**` absorbs zero or more segments.
            if match_segments(text, &pattern[1..]) {
                return true;
            }
            !text.is_empty() && match_segments(&text[1..], pattern)
        }
        (Some(seg), Some(pat)) => {
            (*pat == "*" || pat == seg) && match_segments(&text[1..], &pattern[1..])
        }
        (None, None) => true,
        _ => false,
    }
}
