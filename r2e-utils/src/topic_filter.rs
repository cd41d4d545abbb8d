//! MQTT-style topic filter matching, shared by connection inputs/outputs,
//! topic discovery, and `searchTopics`.
//!
//! Filters use `/`-separated segments. `+` matches exactly one segment,
//! `#` matches the rest of the topic (must be the last segment), and a
//! bare `*` inside a segment matches any run of characters within that
//! segment (a `searchTopics`-style glob, not part of the MQTT grammar but
//! folded into the same matcher since both address the same problem).

/// Match `topic` against `filter`. Case-insensitive unless `case_sensitive`.
pub fn matches(filter: &str, topic: &str, case_sensitive: bool) -> bool {
    let (filter, topic) = if case_sensitive {
        (filter.to_string(), topic.to_string())
    } else {
        (filter.to_lowercase(), topic.to_lowercase())
    };
    let filter_segs: Vec<&str> = filter.split('/').collect();
    let topic_segs: Vec<&str> = topic.split('/').collect();
    matches_segments(&filter_segs, &topic_segs)
}

fn matches_segments(filter: &[&str], topic: &[&str]) -> bool {
    match filter.first() {
        None => topic.is_empty(),
        Some(&"#") => true,
        Some(&"+") => {
            !topic.is_empty() && matches_segments(&filter[1..], &topic[1..])
        }
        Some(seg) => {
            let Some(&t) = topic.first() else {
                return false;
            };
            segment_matches(seg, t) && matches_segments(&filter[1..], &topic[1..])
        }
    }
}

/// Glob match within a single segment: `*` matches any run of characters.
fn segment_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(idx) = rest.find(part) {
            rest = &rest[idx + part.len()..];
        } else {
            return false;
        }
    }
    true
}
