//! Segment-wise wildcard topic matching. Deliberately not a general regex
//! engine: `*` matches exactly one segment, `**` matches one or more
//! segments (greedy), and topic separators (`/`) are always literal.
//! Tested in isolation since a bug here silently applies the wrong schema.

/// Splits a pattern or topic on `/` into segments.
fn segments(s: &str) -> Vec<&str> {
    s.split('/').collect()
}

/// True iff `pattern` matches `topic` under `*`/`**` segment semantics.
#[must_use]
pub fn matches(pattern: &str, topic: &str) -> bool {
    match_segments(&segments(pattern), &segments(topic))
}

fn match_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"**") => {
            // `**` requires at least one segment: `a/**/x` matches `a/b/x`
            // but not `a/x`.
            if topic.is_empty() {
                return false;
            }
            (1..=topic.len()).any(|consumed| match_segments(&pattern[1..], &topic[consumed..]))
        }
        Some(&"*") => {
            !topic.is_empty() && match_segments(&pattern[1..], &topic[1..])
        }
        Some(&literal) => {
            topic.first() == Some(&literal) && match_segments(&pattern[1..], &topic[1..])
        }
    }
}

/// Number of non-wildcard segments in a pattern, used for precedence:
/// most-literal-segments wins; ties broken by the longer pattern string.
#[must_use]
pub fn literal_segment_count(pattern: &str) -> usize {
    segments(pattern)
        .iter()
        .filter(|s| **s != "*" && **s != "**")
        .count()
}

/// Picks the best-matching pattern out of every pattern in `candidates`
/// that matches `topic`: most literal segments first, ties broken by the
/// lexicographically longer pattern string. Returns `None` if nothing
/// matches.
#[must_use]
pub fn best_match<'a, T>(topic: &str, candidates: &'a [(String, T)]) -> Option<&'a (String, T)> {
    candidates
        .iter()
        .filter(|(pattern, _)| matches(pattern, topic))
        .max_by(|(a, _), (b, _)| {
            literal_segment_count(a)
                .cmp(&literal_segment_count(b))
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.cmp(b))
        })
}
