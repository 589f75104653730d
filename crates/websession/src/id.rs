//! Canonical session ids.
//!
//! Some containers append a routing tag and a creation timestamp to newly
//! generated ids, e.g. `pdpTSTcCcG6CVM8B!-508312620!1385045122601`. The
//! cache key must not depend on which node issued the id, so the suffix is
//! stripped before any cache operation.

/// Map a container-issued id to the canonical cache key.
///
/// Returns the prefix before the first `!` when a second `!` follows it.
/// Ids with fewer than two delimiters, or whose first delimiter is the last
/// character, are returned unchanged.
pub fn normalize(raw_id: &str) -> &str {
    let Some(first) = raw_id.find('!') else {
        return raw_id;
    };

    if first == raw_id.len() - 1 {
        return raw_id;
    }

    if raw_id[first + 1..].contains('!') {
        &raw_id[..first]
    } else {
        raw_id
    }
}
