//! Process-global redaction registry (component C5).
//!
//! `register`/`unregister` maintain the set of sensitive byte strings;
//! `redact` scrubs them out of arbitrary text. The Aho-Corasick matcher is
//! rebuilt lazily on the first `redact` call after a registration change,
//! never eagerly on `register`/`unregister` themselves, so a burst of
//! registrations only pays the rebuild cost once.

use std::collections::HashSet;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use parking_lot::RwLock;

/// Values shorter than this are ignored: matching them would produce an
/// unusable number of false positives in ordinary log text.
const MIN_PATTERN_LEN: usize = 4;

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

struct Registry {
    patterns: RwLock<HashSet<Vec<u8>>>,
    matcher: RwLock<Option<AhoCorasick>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        patterns: RwLock::new(HashSet::new()),
        matcher: RwLock::new(None),
    })
}

/// Register a sensitive value so future `redact` calls scrub it. Values
/// shorter than 4 bytes are silently ignored (spec.md §4.5).
pub fn register(value: impl AsRef<[u8]>) {
    let bytes = value.as_ref();
    if bytes.len() < MIN_PATTERN_LEN {
        return;
    }
    let reg = registry();
    let mut patterns = reg.patterns.write();
    if patterns.insert(bytes.to_vec()) {
        *reg.matcher.write() = None;
    }
}

/// Remove a previously registered value. No-op if it was never registered
/// or already removed.
pub fn unregister(value: impl AsRef<[u8]>) {
    let reg = registry();
    let mut patterns = reg.patterns.write();
    if patterns.remove(value.as_ref()) {
        *reg.matcher.write() = None;
    }
}

/// Replace every occurrence of a registered value in `text` with
/// `[REDACTED]`. Cost is O(text length + matches); the matcher is rebuilt
/// only when a registration change happened since the last call.
pub fn redact(text: &str) -> String {
    let reg = registry();
    let needs_rebuild = reg.matcher.read().is_none();
    if needs_rebuild {
        let patterns = reg.patterns.read();
        if patterns.is_empty() {
            return text.to_owned();
        }
        let built = build_matcher(&patterns);
        *reg.matcher.write() = Some(built);
    }

    let matcher_guard = reg.matcher.read();
    let Some(matcher) = matcher_guard.as_ref() else {
        return text.to_owned();
    };
    if matcher.patterns_len() == 0 {
        return text.to_owned();
    }
    let replacements = vec![REDACTED_PLACEHOLDER; matcher.patterns_len()];
    matcher.replace_all(text, &replacements)
}

fn build_matcher(patterns: &HashSet<Vec<u8>>) -> AhoCorasick {
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(patterns.iter())
        .expect("pattern set is always valid UTF-8-agnostic byte strings")
}

/// Drop every registered value. Intended for test isolation; production
/// code never needs this (values live for the process lifetime).
#[cfg(any(test, feature = "test-support"))]
pub fn clear_for_tests() {
    let reg = registry();
    reg.patterns.write().clear();
    *reg.matcher.write() = None;
}
