//! # Topic Grammar
//!
//! Topics name a measurement on an asset, `measurement[.qualifier]@assetName`,
//! and serve both as bus routing keys and as cache keys. This module builds
//! the exact-match subscription filters registered on the bus and splits
//! result topics back into their `(type, asset)` parts.

/// Regex metacharacters that must be escaped when a topic is embedded in a
/// subscription pattern.
const TO_BE_ESCAPED: &str = ".^$|()[]{}*+?\\";

/// Build an anchored subscription pattern matching exactly `topic`.
///
/// The underlying subscription mechanism is pattern-based, so every regex
/// metacharacter in the topic is backslash-escaped and the result is
/// anchored with `^`/`$`. The returned filter matches the literal topic and
/// nothing else.
pub fn subscription_filter(topic: &str) -> String {
    let mut pattern = String::with_capacity(topic.len() + 2);
    pattern.push('^');
    for c in topic.chars() {
        if TO_BE_ESCAPED.contains(c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('$');
    pattern
}

/// Split a result topic at the **last** `@` into `(metric type, asset name)`.
///
/// Returns `None` for topics without `@`; those are invalid as routing keys
/// for derived metrics.
pub fn split_topic(topic: &str) -> Option<(&str, &str)> {
    let at = topic.rfind('@')?;
    Some((&topic[..at], &topic[at + 1..]))
}
