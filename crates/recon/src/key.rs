//! Crossing identifiers: identity key, loose lookup key, ordering.
//!
//! Three views of the same free-text identifier are used throughout the
//! engine:
//!
//! - [`exact_key`]: trimmed, upper-cased text. Cheapest match, used first.
//! - [`lookup_key`]: zero-padding and punctuation collapsed. A secondary
//!   index only; it can map two different crossings together.
//! - [`CrossingKey`]: `(numeric, suffix)`. The identity every container is
//!   keyed by, and the ordering used for export.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a crossing, derived from its display text.
///
/// Field order matters: the derived `Ord` compares `numeric` first, then the
/// upper-cased suffix ordinally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrossingKey {
    numeric: u64,
    suffix: String,
}

impl CrossingKey {
    /// Derive a key from display text. Blank text has no key.
    pub fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        let (numeric, suffix) = parse(text);
        Some(Self {
            numeric,
            suffix: suffix.to_uppercase(),
        })
    }

    pub fn numeric(&self) -> u64 {
        self.numeric
    }

    /// Upper-cased non-digit remainder.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for CrossingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numeric, self.suffix)
    }
}

/// Split an identifier into its digits (any position, as one integer) and
/// the remaining non-whitespace characters.
///
/// Never fails: no digits, or a digit run too large for `u64`, gives 0.
pub fn parse(text: &str) -> (u64, String) {
    let mut digits = String::new();
    let mut suffix = String::new();
    for c in text.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !c.is_whitespace() {
            suffix.push(c);
        }
    }
    let numeric = if digits.is_empty() {
        0
    } else {
        digits.parse::<u64>().unwrap_or(0)
    };
    (numeric, suffix)
}

/// Order two identifiers by numeric value, then case-insensitive suffix.
pub fn compare(a: &str, b: &str) -> Ordering {
    let (an, asuf) = parse(a);
    let (bn, bsuf) = parse(b);
    an.cmp(&bn)
        .then_with(|| asuf.to_uppercase().cmp(&bsuf.to_uppercase()))
}

/// Trimmed, upper-cased text.
pub fn exact_key(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Loose key for matching sources with inconsistent zero-padding.
///
/// Each maximal digit run loses its leading zeros (keeping at least one
/// digit), letters are upper-cased, everything else is dropped. `X04`,
/// `x4` and `X-4` all give `X4`. Digit runs are taken from the original
/// text, so `1-04` gives `14`, not `104`.
pub fn lookup_key(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            run.push(c);
            continue;
        }
        flush_digit_run(&mut run, &mut out);
        if c.is_alphanumeric() {
            out.extend(c.to_uppercase());
        }
    }
    flush_digit_run(&mut run, &mut out);
    out
}

fn flush_digit_run(run: &mut String, out: &mut String) {
    if run.is_empty() {
        return;
    }
    let trimmed = run.trim_start_matches('0');
    if trimmed.is_empty() {
        out.push('0');
    } else {
        out.push_str(trimmed);
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_digits_and_suffix() {
        assert_eq!(parse("X4"), (4, "X".to_string()));
        assert_eq!(parse("X04A"), (4, "XA".to_string()));
        assert_eq!(parse("  12 b "), (12, "b".to_string()));
        assert_eq!(parse("ABC"), (0, "ABC".to_string()));
        assert_eq!(parse(""), (0, String::new()));
    }

    #[test]
    fn parse_overflow_is_zero() {
        let (n, s) = parse("X99999999999999999999999");
        assert_eq!(n, 0);
        assert_eq!(s, "X");
    }

    #[test]
    fn key_equality_ignores_padding_and_case() {
        assert_eq!(CrossingKey::from_text("X4"), CrossingKey::from_text("x04"));
        assert_ne!(CrossingKey::from_text("X4"), CrossingKey::from_text("Y4"));
        assert_ne!(CrossingKey::from_text("X4"), CrossingKey::from_text("X40"));
    }

    #[test]
    fn blank_text_has_no_key() {
        assert!(CrossingKey::from_text("").is_none());
        assert!(CrossingKey::from_text("   ").is_none());
    }

    #[test]
    fn ordering_is_numeric_first() {
        assert_eq!(compare("X4", "X10"), Ordering::Less);
        assert_eq!(compare("X10", "X4"), Ordering::Greater);
        assert_eq!(compare("x4", "X04"), Ordering::Equal);
        assert_eq!(compare("4A", "4B"), Ordering::Less);

        let a = CrossingKey::from_text("X4").unwrap();
        let b = CrossingKey::from_text("X10").unwrap();
        assert!(a < b);
    }

    #[test]
    fn lookup_key_collapses_padding() {
        assert_eq!(lookup_key("X04"), "X4");
        assert_eq!(lookup_key("x-4"), "X4");
        assert_eq!(lookup_key("X000"), "X0");
        assert_eq!(lookup_key("1-04"), "14");
        assert_eq!(lookup_key(" A 007 b "), "A7B");
    }

    #[test]
    fn lookup_key_can_collide_distinct_crossings() {
        // Different identities, same loose key.
        assert_ne!(CrossingKey::from_text("X-4"), CrossingKey::from_text("X4"));
        assert_eq!(lookup_key("X-4"), lookup_key("X4"));
    }
}
