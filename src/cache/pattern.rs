//! Glob Patterns
//!
//! Compiles key globs (`*` and `?`, everything else literal) into anchored
//! regexes for the fallback tier, and renders the same glob for a backend
//! `SCAN MATCH` with Redis's own metacharacters (`[`, `]`, `\`) escaped so
//! both tiers select the same keys.

use regex::Regex;

use crate::error::{CacheError, Result};

// == Key Pattern ==
/// A compiled key glob.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    scan_glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles `glob`. `*` matches any run of characters, `?` exactly one;
    /// everything else is literal.
    pub fn new(glob: &str) -> Result<Self> {
        if glob.is_empty() {
            return Err(CacheError::InvalidRequest(
                "Pattern cannot be empty".to_string(),
            ));
        }

        let mut source = String::with_capacity(glob.len() + 8);
        let mut scan_glob = String::with_capacity(glob.len());
        source.push('^');
        let mut literal = [0u8; 4];
        for ch in glob.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
            if matches!(ch, '[' | ']' | '\\') {
                scan_glob.push('\\');
            }
            scan_glob.push(ch);
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| CacheError::InvalidRequest(format!("Invalid pattern {glob:?}: {e}")))?;

        Ok(Self {
            glob: glob.to_string(),
            scan_glob,
            regex,
        })
    }

    /// Whether `key` matches the whole glob.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The glob as given.
    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    /// The glob escaped for `SCAN MATCH`, where `[`, `]` and `\` would
    /// otherwise form character classes and escapes.
    pub fn scan_glob(&self) -> &str {
        &self.scan_glob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_prefix_family() {
        let pattern = KeyPattern::new("user:*").unwrap();
        assert!(pattern.matches("user:1"));
        assert!(pattern.matches("user:1:posts"));
        assert!(pattern.matches("user:"));
        assert!(!pattern.matches("event:1"));
        assert!(!pattern.matches("xuser:1"));
    }

    #[test]
    fn test_question_mark_matches_single_char() {
        let pattern = KeyPattern::new("post:?").unwrap();
        assert!(pattern.matches("post:7"));
        assert!(!pattern.matches("post:77"));
        assert!(!pattern.matches("post:"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = KeyPattern::new("route:/api/feed?page=(1)").unwrap();
        assert!(pattern.matches("route:/api/feedXpage=(1)"));
        assert!(!pattern.matches("route:/api/feedXpage=1"));

        let dotted = KeyPattern::new("a.b").unwrap();
        assert!(dotted.matches("a.b"));
        assert!(!dotted.matches("axb"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(
            KeyPattern::new(""),
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_as_glob_preserves_input() {
        let pattern = KeyPattern::new("group:*:members").unwrap();
        assert_eq!(pattern.as_glob(), "group:*:members");
    }

    #[test]
    fn test_scan_glob_escapes_redis_metacharacters() {
        let pattern = KeyPattern::new("route:/items?filter[a]=*").unwrap();
        assert_eq!(pattern.scan_glob(), r"route:/items?filter\[a\]=*");
        assert!(pattern.matches("route:/items?filter[a]=1"));
        assert!(!pattern.matches("route:/items?filtera=1"));

        let slashed = KeyPattern::new(r"path\to:*").unwrap();
        assert_eq!(slashed.scan_glob(), r"path\\to:*");
        assert!(slashed.matches(r"path\to:1"));
    }

    #[test]
    fn test_scan_glob_plain_pattern_unchanged() {
        let pattern = KeyPattern::new("user:?:posts:*").unwrap();
        assert_eq!(pattern.scan_glob(), "user:?:posts:*");
    }
}
