//! Tool-name patterns
//!
//! Patterns are compiled once from strings such as `"*"`, `"list_*"` or
//! `"get_user"` into a closed [`Pattern`] variant, then matched without any
//! further string scanning.

use std::fmt;
use std::str::FromStr;

use crate::error::BrokerError;

/// A compiled name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `*`: matches every name.
    Any,
    /// `prefix*`: matches names starting with the prefix.
    Prefix(String),
    /// Exact name.
    Literal(String),
}

impl Pattern {
    /// Returns `true` if `name` is matched by this pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use credential_broker::pattern::Pattern;
    ///
    /// let pattern: Pattern = "list_*".parse().unwrap();
    /// assert!(pattern.matches("list_users"));
    /// assert!(!pattern.matches("get_user"));
    /// ```
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Literal(literal) => name == literal,
        }
    }
}

impl FromStr for Pattern {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::InvalidPattern("pattern is empty".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(BrokerError::InvalidPattern(format!(
                "'{}' contains whitespace",
                raw
            )));
        }
        if trimmed == "*" {
            return Ok(Pattern::Any);
        }

        match trimmed.find('*') {
            None => Ok(Pattern::Literal(trimmed.to_string())),
            Some(idx) if idx == trimmed.len() - 1 => {
                Ok(Pattern::Prefix(trimmed[..idx].to_string()))
            }
            Some(_) => Err(BrokerError::InvalidPattern(format!(
                "'{}': '*' is only supported as the final character",
                raw
            ))),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Prefix(prefix) => write!(f, "{}*", prefix),
            Pattern::Literal(literal) => f.write_str(literal),
        }
    }
}

/// An allow-list of tool names built from patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFilter {
    patterns: Vec<Pattern>,
}

impl ToolFilter {
    /// Compiles every pattern, failing on the first invalid one.
    ///
    /// An empty list allows nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidPattern`] naming the offending pattern.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BrokerError> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().parse::<Pattern>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// A filter that allows every tool.
    pub fn allow_all() -> Self {
        Self {
            patterns: vec![Pattern::Any],
        }
    }

    /// Returns `true` if any pattern matches `tool`.
    pub fn allows(&self, tool: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(tool))
    }

    /// Returns `true` if the filter is exactly the `*` pattern.
    pub fn is_allow_all(&self) -> bool {
        self.patterns.iter().any(|p| *p == Pattern::Any)
    }

    /// The compiled patterns.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

impl Default for ToolFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}
