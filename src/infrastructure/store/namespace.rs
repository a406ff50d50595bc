//! Key Namespaces
//!
//! The store is one unpartitioned keyspace shared by every subsystem, so
//! each subsystem owns a reserved prefix. Components take a `Namespace`
//! at construction and never build unprefixed keys.

use std::fmt;

/// Reserved key prefix of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Cache-aside values (`cache:{key}`)
    Cache,
    /// Login and push-connection sessions (`session:{sessionId}`)
    Session,
    /// Fixed window counters (`ratelimit:{key}:{windowStartMs}`)
    RateLimit,
    /// Sliding window logs (`sliding:{key}`)
    Sliding,
}

impl Namespace {
    pub const fn prefix(self) -> &'static str {
        match self {
            Namespace::Cache => "cache:",
            Namespace::Session => "session:",
            Namespace::RateLimit => "ratelimit:",
            Namespace::Sliding => "sliding:",
        }
    }

    /// Full store key for `key` inside this namespace.
    #[inline]
    pub fn key(self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }

    /// Strips this namespace's prefix from a full store key.
    pub fn strip<'a>(self, full_key: &'a str) -> Option<&'a str> {
        full_key.strip_prefix(self.prefix())
    }
}

/// Escapes glob metacharacters so `text` matches only itself inside a
/// SCAN/PSUBSCRIBE pattern.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches(':'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_distinct() {
        let all = [
            Namespace::Cache,
            Namespace::Session,
            Namespace::RateLimit,
            Namespace::Sliding,
        ];
        for a in all {
            for b in all {
                if a != b {
                    assert!(!a.prefix().starts_with(b.prefix()));
                }
            }
        }
    }

    #[test]
    fn test_key_and_strip() {
        let key = Namespace::Session.key("abc");
        assert_eq!(key, "session:abc");
        assert_eq!(Namespace::Session.strip(&key), Some("abc"));
        assert_eq!(Namespace::Cache.strip(&key), None);
        assert_eq!(Namespace::Sliding.to_string(), "sliding");
    }

    #[test]
    fn test_escape_glob_matches_only_literal() {
        use crate::infrastructure::store::glob_match;

        let pattern = format!("metrics:{}:*", escape_glob("c*"));
        assert_eq!(pattern, r"metrics:c\*:*");
        assert!(glob_match(&pattern, "metrics:c*:google"));
        assert!(!glob_match(&pattern, "metrics:c1:google"));

        for id in ["c?", "c[12]", r"c\x"] {
            let pattern = format!("metrics:{}:*", escape_glob(id));
            assert!(glob_match(&pattern, &format!("metrics:{}:google", id)));
            assert!(!glob_match(&pattern, "metrics:c1:google"));
        }
    }
}
