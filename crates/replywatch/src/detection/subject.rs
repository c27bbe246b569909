//! Subject normalization for the subject-matching fallback.

use std::sync::LazyLock;

use regex::Regex;

/// One or more leading reply/forward markers, e.g. `RE: Fwd: AW[2]:`.
static RE_PREFIXES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:re|fw|fwd|aw|wg|sv|vs|antw|tr|rif|enc)\s*(?:\[\d+\])?\s*:\s*)+")
        .unwrap()
});

/// A leading marker that means "reply" rather than "forward".
static RE_REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:re|aw|sv|vs|antw|rif)\s*(?:\[\d+\])?\s*:").unwrap()
});

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strips leading reply/forward prefixes and collapses whitespace.
pub fn normalize_subject(subject: &str) -> String {
    let stripped = RE_PREFIXES.replace(subject, "");
    RE_WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

pub fn has_reply_prefix(subject: &str) -> bool {
    RE_REPLY_PREFIX.is_match(subject)
}

/// Case-insensitive containment of a normalized subject.
pub fn subject_contains(candidate: &str, normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    normalize_subject(candidate)
        .to_lowercase()
        .contains(&normalized.to_lowercase())
}
