//! Equality based label selectors: `k=v`, `k==v`, `k!=v`, `k` and `!k`,
//! comma separated. Every requirement must hold.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("empty requirement in selector {0:?}")]
    EmptyRequirement(String),
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {0:?}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            // A missing label is not equal to anything.
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{key}={value}"),
            Requirement::NotEquals(key, value) => write!(f, "{key}!={value}"),
            Requirement::Exists(key) => f.write_str(key),
            Requirement::NotExists(key) => write!(f, "!{key}"),
        }
    }
}

/// The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Ok(Self::everything());
        }

        let requirements = selector
            .split(',')
            .map(|part| parse_requirement(selector, part.trim()))
            .collect::<Result<_, _>>()?;
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            req.fmt(f)?;
        }
        Ok(())
    }
}

fn parse_requirement(selector: &str, part: &str) -> Result<Requirement, SelectorError> {
    if part.is_empty() {
        return Err(SelectorError::EmptyRequirement(selector.to_string()));
    }

    let requirement = if let Some((key, value)) = part.split_once("!=") {
        Requirement::NotEquals(valid_key(key)?, valid_value(value)?)
    } else if let Some((key, value)) = part.split_once("==") {
        Requirement::Equals(valid_key(key)?, valid_value(value)?)
    } else if let Some((key, value)) = part.split_once('=') {
        Requirement::Equals(valid_key(key)?, valid_value(value)?)
    } else if let Some(key) = part.strip_prefix('!') {
        Requirement::NotExists(valid_key(key)?)
    } else {
        Requirement::Exists(valid_key(part)?)
    };
    Ok(requirement)
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// An optional `prefix/` followed by a name.
fn valid_key(key: &str) -> Result<String, SelectorError> {
    let key = key.trim();
    let name = match key.split_once('/') {
        Some((prefix, name)) if !prefix.is_empty() && prefix.chars().all(is_label_char) => name,
        Some(_) => return Err(SelectorError::InvalidKey(key.to_string())),
        None => key,
    };
    if name.is_empty() || !name.chars().all(is_label_char) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(key.to_string())
}

fn valid_value(value: &str) -> Result<String, SelectorError> {
    let value = value.trim();
    if !value.chars().all(is_label_char) {
        return Err(SelectorError::InvalidValue(value.to_string()));
    }
    Ok(value.to_string())
}
