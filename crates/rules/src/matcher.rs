//! MQTT-style topic pattern matching over a prefix-filtering transport.
//!
//! The broker's SUB sockets only filter on string prefixes, so full
//! wildcard semantics live here: the engine subscribes to the longest
//! wildcard-free prefix of each pattern and re-checks every delivered
//! message with [`topic_matches`].

use crate::schema::Rule;

/// Does `pattern` match `topic`?
///
/// A pattern matches iff one of:
/// - it equals the topic verbatim
/// - it is the bare wildcard `#`
/// - it ends in `/#` and the topic starts with the part before the `#`
/// - it is segment-wise equal to the topic, with `+` matching exactly one
///   segment (segment counts must be equal)
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }
    if pattern == "#" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/#") {
        // `a/b/#` matches `a/b/c` and deeper, but not `a/b` itself and
        // not `a/bc/d`.
        return topic.starts_with(prefix)
            && topic.len() > prefix.len()
            && topic.as_bytes()[prefix.len()] == b'/';
    }
    if pattern.contains('+') {
        let pattern_segments: Vec<&str> = pattern.split('/').collect();
        let topic_segments: Vec<&str> = topic.split('/').collect();
        if pattern_segments.len() != topic_segments.len() {
            return false;
        }
        return pattern_segments
            .iter()
            .zip(&topic_segments)
            .all(|(p, t)| *p == "+" || p == t);
    }
    false
}

/// Longest wildcard-free prefix of a pattern, for transport subscription.
///
/// `gateway/+/heartbeat` yields `gateway/`, `gateway/g1/#` yields
/// `gateway/g1/`, bare `#` (or a leading wildcard) yields `""` which
/// subscribes to everything.
pub fn subscription_prefix(pattern: &str) -> &str {
    match pattern.find(['+', '#']) {
        Some(pos) => &pattern[..pos],
        None => pattern,
    }
}

/// Deduplicated subscription prefixes for all enabled rules.
///
/// A prefix already covered by a shorter one in the set is dropped. An
/// empty prefix (match-all) collapses the whole set.
pub fn subscription_prefixes(rules: &[Rule]) -> Vec<String> {
    let mut prefixes: Vec<&str> = rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| subscription_prefix(&r.topic_pattern))
        .collect();
    prefixes.sort();
    prefixes.dedup();

    if prefixes.iter().any(|p| p.is_empty()) {
        return vec![String::new()];
    }

    let mut kept: Vec<String> = Vec::new();
    for prefix in prefixes {
        if !kept.iter().any(|k| prefix.starts_with(k.as_str())) {
            kept.push(prefix.to_string());
        }
    }
    kept
}
