// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Key matching for invalidation and scans.

use std::fmt;
use std::str::FromStr;

use crate::error::{CacheError, Result};

/// A pattern matched against cache keys.
///
/// Three grammars are supported:
/// - `"user:42"`: an exact key,
/// - `"user:*"`: a prefix glob (a single trailing `*`),
/// - `"re:^user:\d+$"`: an anchored regular expression.
///
/// # Examples
///
/// ```
/// use strata_tier::KeyPattern;
///
/// let p: KeyPattern = "user:*".parse().unwrap();
/// assert!(p.matches("user:1"));
/// assert!(!p.matches("order:1"));
/// ```
#[derive(Clone, Debug)]
pub enum KeyPattern {
    /// Matches one key verbatim.
    Exact(String),
    /// Matches every key starting with the prefix.
    Prefix(String),
    /// Matches keys against a compiled regular expression.
    Regex(regex::Regex),
}

impl KeyPattern {
    /// Builds a prefix pattern without going through the string grammar.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Builds an exact-key pattern.
    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    /// Compiles a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if the expression does not
    /// compile.
    pub fn regex(expr: &str) -> Result<Self> {
        let compiled = regex::Regex::new(expr)
            .map_err(|e| CacheError::InvalidConfig(format!("invalid key pattern /{expr}/: {e}")))?;
        Ok(Self::Regex(compiled))
    }

    /// Parses the string grammar described on the type.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for an uncompilable regex or
    /// an empty pattern.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(CacheError::InvalidConfig("empty key pattern".into()));
        }
        if let Some(expr) = raw.strip_prefix("re:") {
            return Self::regex(expr);
        }
        if let Some(prefix) = raw.strip_suffix('*') {
            return Ok(Self::Prefix(prefix.to_string()));
        }
        Ok(Self::Exact(raw.to_string()))
    }

    /// Returns `true` if `key` matches this pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => key == k,
            Self::Prefix(p) => key.starts_with(p),
            Self::Regex(re) => re.is_match(key),
        }
    }
}

/// Renders the pattern back in its string grammar, for logging and sync
/// events.
impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(k) => f.write_str(k),
            Self::Prefix(p) => write!(f, "{p}*"),
            Self::Regex(re) => write!(f, "re:{}", re.as_str()),
        }
    }
}

impl FromStr for KeyPattern {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
