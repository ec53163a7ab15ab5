//! Character-level diff helpers shared by every tool-call dialect.
//!
//! Partial-JSON reparsing of a growing buffer yields serializations whose
//! last few characters oscillate (e.g. `"ap"` grows to `"apple"` -- the
//! closing quote appears in both parses but at different positions).
//! Emitting raw string diffs would ship close-quotes prematurely. These
//! three functions exist to compute only the genuinely new characters.
//!
//! All three operate on Unicode code points, not bytes, so multi-byte
//! characters are never split mid-sequence.

/// Longest string that is a prefix of both `a` and `b`. Order-independent.
pub fn common_prefix(a: &str, b: &str) -> String {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Longest string that is a suffix of both `a` and `b`, stopping at the
/// first (from the end) shared alphanumeric character.
///
/// The alphanumeric stop is a heuristic: it prevents the suffix from ever
/// eating into an identifier or literal value, so only structural
/// punctuation (`"`, `]`, `}`, `,`, whitespace) is ever shared as a
/// suffix. Pathological inputs where an identifier ends in a structural
/// character can't occur in well-formed JSON, so the heuristic holds.
pub fn common_suffix(a: &str, b: &str) -> String {
    let a_rev: Vec<char> = a.chars().rev().collect();
    let b_rev: Vec<char> = b.chars().rev().collect();
    let mut suffix_rev = Vec::new();
    for (x, y) in a_rev.iter().zip(b_rev.iter()) {
        if x == y && !x.is_alphanumeric() {
            suffix_rev.push(*x);
        } else {
            break;
        }
    }
    suffix_rev.into_iter().rev().collect()
}

fn strip_suffix_once(s: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return s.to_string();
    }
    s.strip_suffix(suffix).unwrap_or(s).to_string()
}

fn strip_prefix_once(s: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return s.to_string();
    }
    s.strip_prefix(prefix).unwrap_or(s).to_string()
}

/// The substring of `curr` that represents characters novel relative to
/// `old`, given that both may share a prefix and/or a suffix.
///
/// `curr` must be the newer parse and `old` the previous step's parse --
/// argument order is significant, unlike `common_prefix`/`common_suffix`.
pub fn intermediate_diff(curr: &str, old: &str) -> String {
    let suffix = common_suffix(curr, old);

    // Strip the suffix from `old` first so that the prefix search below
    // doesn't re-discover characters already accounted for by `suffix`.
    let old_without_suffix = strip_suffix_once(old, &suffix);
    let prefix = common_prefix(curr, &old_without_suffix);

    let mut diff = strip_suffix_once(curr, &suffix);
    diff = strip_prefix_once(&diff, &prefix);
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_basic() {
        assert_eq!(common_prefix("apple", "applesauce"), "apple");
        assert_eq!(common_prefix("applesauce", "apple"), "apple");
        assert_eq!(common_prefix("abc", "xyz"), "");
        assert_eq!(common_prefix("", "abc"), "");
    }

    #[test]
    fn prefix_has_no_strict_extension() {
        let p = common_prefix("{\"fruit\": \"ap\"}", "{\"fruit\": \"apple\"}");
        assert_eq!(p, "{\"fruit\": \"ap");
        // extending by one more char breaks the shared-prefix property
        let extended = format!("{}{}", p, "X");
        assert!(!"{\"fruit\": \"apple\"}".starts_with(&extended));
    }

    #[test]
    fn suffix_basic() {
        assert_eq!(
            common_suffix("{\"fruit\": \"ap\"}", "{\"fruit\": \"apple\"}"),
            "\"}"
        );
    }

    #[test]
    fn suffix_stops_at_alphanumeric() {
        // both end in '}', but the preceding letters ('e' vs 'e') are
        // themselves equal -- yet alphanumeric, so the scan still stops
        // at the letter boundary rather than crossing into the word.
        assert_eq!(common_suffix("apple}", "maple}"), "}");
    }

    #[test]
    fn suffix_stops_before_shared_letters() {
        // Both end in a shared letter -- alphanumeric, so nothing is
        // captured even though the characters match all the way back to it.
        assert_eq!(common_suffix("xyzw", "abcw"), "");
        // A shared trailing punctuation run is captured; the scan stops the
        // moment it reaches the shared letter behind it.
        assert_eq!(common_suffix("xyzw!", "abcw!"), "!");
        assert_eq!(common_suffix("hello world!", "goodbye world!"), "!");
    }

    #[test]
    fn intermediate_diff_basic() {
        assert_eq!(
            intermediate_diff("{\"fruit\": \"apple\"}", "{\"fruit\": \"ap\"}"),
            "ple"
        );
    }

    #[test]
    fn intermediate_diff_growing_array() {
        assert_eq!(intermediate_diff("[1, 2, 3]", "[1, 2"), ", 3]");
    }

    #[test]
    fn intermediate_diff_reconstructs_curr() {
        let old = "{\"city\": \"Par";
        let curr = "{\"city\": \"Paris\"}";
        let diff = intermediate_diff(curr, old);
        let suffix = common_suffix(curr, old);
        // consuming the emitted diff plus the shared suffix must reconstruct curr
        let old_without_suffix = strip_suffix_once(old, &suffix);
        let prefix = common_prefix(curr, &old_without_suffix);
        assert_eq!(format!("{}{}{}", prefix, diff, suffix), curr);
    }

    #[test]
    fn intermediate_diff_empty_inputs() {
        assert_eq!(intermediate_diff("abc", ""), "abc");
        assert_eq!(intermediate_diff("", ""), "");
    }
}
