//! Resource patterns: dot-separated tokens with `$name` placeholders and an
//! optional trailing `>` wildcard.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::ConfigError;

/// Path parameters bound by a placeholder match, keyed by name without `$`.
pub type PathParams = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param(String),
    Tail,
}

impl Token {
    /// Literal beats placeholder beats tail wildcard.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 2,
            Self::Param(_) => 1,
            Self::Tail => 0,
        }
    }
}

/// A parsed resource pattern such as `myapp.rooms.$roomID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for empty tokens, an unnamed
    /// `$`, a `>` that is not last, or a repeated placeholder name.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());
        let mut names = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(invalid("empty token")),
                ">" if i + 1 == parts.len() => Token::Tail,
                ">" => return Err(invalid("'>' must be the last token")),
                p if p.starts_with('$') => {
                    let name = &p[1..];
                    if name.is_empty() {
                        return Err(invalid("placeholder without a name"));
                    }
                    if names.contains(&name) {
                        return Err(invalid("duplicate placeholder"));
                    }
                    names.push(name);
                    Token::Param(name.to_string())
                }
                p if p.contains(['*', '?']) || p.contains(char::is_whitespace) => {
                    return Err(invalid("illegal character in token"));
                }
                p => Token::Literal(p.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches `rid` against the pattern, returning the bound path parameters.
    #[must_use]
    pub fn matches(&self, rid: &str) -> Option<PathParams> {
        let parts: Vec<&str> = rid.split('.').collect();
        let mut params = PathParams::new();

        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Tail => return (parts.len() > i).then_some(params),
                Token::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Token::Param(name) => {
                    let value = parts.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }

        (parts.len() == self.tokens.len()).then_some(params)
    }

    /// Orders patterns so the more specific one compares greater.
    ///
    /// Tokens are compared left to right by rank; on a tie the longer
    /// pattern wins.
    #[must_use]
    pub fn specificity_cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.tokens.iter().zip(&other.tokens) {
            match a.rank().cmp(&b.rank()) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.tokens.len().cmp(&other.tokens.len())
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
