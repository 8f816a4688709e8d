//! Flattened field sets and field selectors (`metadata.name=foo,spec.unschedulable!=true`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::RegistryError;

/// Flattened, string-valued view of an object used for field selection.
pub type Set = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl Requirement {
    /// A field absent from the set compares as the empty string.
    pub fn matches(&self, fields: &Set) -> bool {
        let got = fields.get(&self.field).map(String::as_str).unwrap_or("");
        match self.op {
            Operator::Equals => got == self.value,
            Operator::NotEquals => got != self.value,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::Equals => write!(f, "{}={}", self.field, self.value),
            Operator::NotEquals => write!(f, "{}!={}", self.field, self.value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: SmallVec<[Requirement; 2]>,
}

impl Selector {
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }
    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    pub fn matches(&self, fields: &Set) -> bool {
        self.requirements.iter().all(|r| r.matches(fields))
    }

    /// Value the selector pins `field` to, if it contains `field=value`.
    pub fn requires_exact_match(&self, field: &str) -> Option<&str> {
        self.requirements
            .iter()
            .find(|r| r.field == field && r.op == Operator::Equals)
            .map(|r| r.value.as_str())
    }

    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let mut requirements = SmallVec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parsed = [("!=", Operator::NotEquals), ("==", Operator::Equals), ("=", Operator::Equals)]
                .into_iter()
                .find_map(|(token, op)| part.split_once(token).map(|(f, v)| (f.trim(), op, v.trim())));
            match parsed {
                Some((field, op, value)) if !field.is_empty() => {
                    requirements.push(Requirement { field: field.to_string(), op, value: value.to_string() })
                }
                _ => {
                    return Err(RegistryError::BadRequest(format!(
                        "invalid field selector {raw:?}: {part:?} is not of the form field=value or field!=value"
                    )))
                }
            }
        }
        Ok(Self { requirements })
    }
}

impl FromStr for Selector {
    type Err = RegistryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}
