//! Dotted Unit Identifiers
//!
//! An identifier names one loadable unit, e.g. `vendor.json.decoder`.
//! Segments are separated by `.` and each segment is a plain word
//! (`[A-Za-z_][A-Za-z0-9_]*`). Identifiers are validated once at the edge and
//! then passed around as `Identifier` values.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok())
        .as_ref()
}

/// A malformed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier '{name}': {reason}")]
pub struct IdentifierError {
    /// The rejected input.
    pub name: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Validated dotted name of a loadable unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap a dotted name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentifierError {
                name,
                reason: "identifier is empty",
            });
        }
        let pattern = identifier_pattern().ok_or_else(|| IdentifierError {
            name: name.clone(),
            reason: "identifier pattern failed to compile",
        })?;
        if !pattern.is_match(&name) {
            return Err(IdentifierError {
                name,
                reason: "expected dot-separated words of letters, digits and '_'",
            });
        }
        Ok(Self(name))
    }

    /// The dotted name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Last segment (`c` for `a.b.c`).
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Parent identifier (`a.b` for `a.b.c`), or `None` for a single segment.
    pub fn parent(&self) -> Option<Identifier> {
        self.0.rfind('.').map(|idx| Identifier(self.0[..idx].to_string()))
    }

    /// True if `self` equals `ancestor` or is a dotted descendant of it.
    ///
    /// `a.b` is within `a`; `ab` is not.
    pub fn is_within(&self, ancestor: &Identifier) -> bool {
        self.0 == ancestor.0
            || (self.0.len() > ancestor.0.len()
                && self.0.starts_with(ancestor.as_str())
                && self.0.as_bytes()[ancestor.0.len()] == b'.')
    }

    /// Relative filesystem path for this identifier (`a/b/c`).
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Identifier::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn test_pattern_compiles() {
        assert!(identifier_pattern().is_some());
    }

    #[test]
    fn test_valid_identifiers() {
        for name in ["a", "dummy_pkg", "vendor.json", "_private.x1.y_2"] {
            assert!(Identifier::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in ["", ".a", "a.", "a..b", "1abc", "a-b", "a b", "a/b"] {
            let err = Identifier::new(name).unwrap_err();
            assert_eq!(err.name, name);
        }
    }

    #[test]
    fn test_segments_and_name() {
        let ident = id("top.mid.leaf");
        assert_eq!(ident.segments().collect::<Vec<_>>(), vec!["top", "mid", "leaf"]);
        assert_eq!(ident.name(), "leaf");
        assert_eq!(id("solo").name(), "solo");
    }

    #[test]
    fn test_parent() {
        assert_eq!(id("a.b.c").parent(), Some(id("a.b")));
        assert_eq!(id("a").parent(), None);
    }

    #[test]
    fn test_is_within() {
        let parent = id("pkg");
        assert!(id("pkg").is_within(&parent));
        assert!(id("pkg.child").is_within(&parent));
        assert!(id("pkg.child.grandchild").is_within(&parent));
        assert!(!id("pkgish").is_within(&parent)); // prefix but not a descendant
        assert!(!id("other.pkg").is_within(&parent));
        assert!(!parent.is_within(&id("pkg.child")));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(id("a.b.c").relative_path(), PathBuf::from("a/b/c"));
    }

    #[test]
    fn test_deserialize_validates() {
        #[derive(Deserialize)]
        struct Doc {
            ids: Vec<Identifier>,
        }
        let doc: Doc = toml::from_str(r#"ids = ["a.b", "c"]"#).unwrap();
        assert_eq!(doc.ids, vec![id("a.b"), id("c")]);
        assert!(toml::from_str::<Doc>(r#"ids = ["a..b"]"#).is_err());
    }
}
