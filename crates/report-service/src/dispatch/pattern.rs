//! Route pattern compilation.
//!
//! A pattern is literal text with `{name}` placeholders. Each placeholder
//! captures one path segment (`[^/]+`); literal text is matched exactly.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route pattern must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("unbalanced braces in route pattern: {0}")]
    UnbalancedBraces(String),

    #[error("empty placeholder in route pattern: {0}")]
    EmptyPlaceholder(String),

    #[error("duplicate placeholder '{name}' in route pattern: {pattern}")]
    DuplicatePlaceholder { pattern: String, name: String },

    #[error("invalid route pattern {pattern}: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    template: Option<Template>,
}

#[derive(Debug, Clone)]
struct Template {
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `RouteError` for a missing leading slash, unbalanced braces,
    /// or empty or repeated placeholder names.
    pub fn compile(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash(pattern.to_string()));
        }

        let mut regex_src = String::from("^");
        let mut names: Vec<String> = Vec::new();
        let mut rest = pattern;

        while let Some((literal, after_open)) = rest.split_once('{') {
            if literal.contains('}') {
                return Err(RouteError::UnbalancedBraces(pattern.to_string()));
            }
            let (name, after_close) = after_open
                .split_once('}')
                .ok_or_else(|| RouteError::UnbalancedBraces(pattern.to_string()))?;
            if name.contains('{') {
                return Err(RouteError::UnbalancedBraces(pattern.to_string()));
            }
            if name.trim().is_empty() {
                return Err(RouteError::EmptyPlaceholder(pattern.to_string()));
            }
            if names.iter().any(|n| n == name) {
                return Err(RouteError::DuplicatePlaceholder {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }

            regex_src.push_str(&regex::escape(literal));
            regex_src.push_str("([^/]+)");
            names.push(name.to_string());
            rest = after_close;
        }
        if rest.contains('}') {
            return Err(RouteError::UnbalancedBraces(pattern.to_string()));
        }

        let template = if names.is_empty() {
            None
        } else {
            regex_src.push_str(&regex::escape(rest));
            regex_src.push('$');
            let regex = Regex::new(&regex_src).map_err(|e| RouteError::Invalid {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            Some(Template { regex, names })
        };

        Ok(Self {
            source: pattern.to_string(),
            template,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern has placeholders.
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// Literal comparison against the pattern text.
    #[must_use]
    pub fn matches_exact(&self, path: &str) -> bool {
        self.source == path
    }

    /// Match `path` against the placeholders, returning captures in
    /// placeholder order. Literal patterns never match here.
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<PathParams> {
        let template = self.template.as_ref()?;
        let caps = template.regex.captures(path)?;
        let params = template
            .names
            .iter()
            .zip(caps.iter().skip(1))
            .filter_map(|(name, value)| value.map(|v| (name.clone(), v.as_str().to_string())))
            .collect();
        Some(PathParams(params))
    }
}

/// Values captured by placeholders, in the order they appear in the pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}
