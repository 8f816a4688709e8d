//! Label sets and label selectors.
//!
//! Grammar, comma separated: `k=v`, `k==v`, `k!=v`, `k in (a,b)`,
//! `k notin (a,b)`, `k` (exists) and `!k` (does not exist). An empty
//! selector matches everything.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::RegistryError;
use crate::validation::{is_qualified_name, is_valid_label_value};

pub type Set = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    pub values: SmallVec<[String; 2]>,
}

impl Requirement {
    pub fn matches(&self, labels: &Set) -> bool {
        let got = labels.get(&self.key);
        match self.op {
            Operator::Equals | Operator::In => got.map_or(false, |v| self.values.iter().any(|x| x == v)),
            Operator::NotEquals | Operator::NotIn => got.map_or(true, |v| !self.values.iter().any(|x| x == v)),
            Operator::Exists => got.is_some(),
            Operator::DoesNotExist => got.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::Equals => write!(f, "{}={}", self.key, self.values.join(",")),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.values.join(",")),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of requirements over a label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: SmallVec<[Requirement; 4]>,
}

impl Selector {
    /// Matches every label set.
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }
    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    pub fn matches(&self, labels: &Set) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let mut requirements = SmallVec::new();
        for part in split_top_level(raw) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(part).map_err(|why| {
                RegistryError::BadRequest(format!("unable to parse requirement {part:?} in label selector {raw:?}: {why}"))
            })?);
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

// Split on commas that are not inside a `( ... )` value list.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&raw[start..]);
    out
}

fn check_key(key: &str) -> Result<String, String> {
    let errs = is_qualified_name(key);
    if errs.is_empty() { Ok(key.to_string()) } else { Err(format!("invalid label key {key:?}: {}", errs.join("; "))) }
}

fn check_value(value: &str) -> Result<String, String> {
    let errs = is_valid_label_value(value);
    if errs.is_empty() { Ok(value.to_string()) } else { Err(format!("invalid label value {value:?}: {}", errs.join("; "))) }
}

fn parse_requirement(s: &str) -> Result<Requirement, String> {
    if let Some(key) = s.strip_prefix('!') {
        return Ok(Requirement { key: check_key(key.trim())?, op: Operator::DoesNotExist, values: SmallVec::new() });
    }
    if let Some(open) = s.find('(') {
        let close = s.rfind(')').filter(|c| *c == s.len() - 1).ok_or("missing closing ')'")?;
        let head: Vec<&str> = s[..open].split_whitespace().collect();
        let (key, op) = match head.as_slice() {
            [key, "in"] => (*key, Operator::In),
            [key, "notin"] => (*key, Operator::NotIn),
            _ => return Err("expected 'in' or 'notin' before value list".to_string()),
        };
        let inner = &s[open + 1..close];
        if inner.trim().is_empty() {
            return Err("value list must not be empty".to_string());
        }
        let values = inner.split(',').map(|v| check_value(v.trim())).collect::<Result<SmallVec<[String; 2]>, _>>()?;
        return Ok(Requirement { key: check_key(key)?, op, values });
    }
    for (token, op) in [("!=", Operator::NotEquals), ("==", Operator::Equals), ("=", Operator::Equals)] {
        if let Some((k, v)) = s.split_once(token) {
            return Ok(Requirement { key: check_key(k.trim())?, op, values: SmallVec::from_elem(check_value(v.trim())?, 1) });
        }
    }
    Ok(Requirement { key: check_key(s)?, op: Operator::Exists, values: SmallVec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> Set {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = Selector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&Set::new()));
        assert!(sel.matches(&set(&[("a", "b")])));
    }

    #[test]
    fn equality_and_set_operators() {
        let labels = set(&[("env", "prod"), ("tier", "web")]);
        assert!(Selector::parse("env=prod").unwrap().matches(&labels));
        assert!(Selector::parse("env==prod,tier=web").unwrap().matches(&labels));
        assert!(!Selector::parse("env!=prod").unwrap().matches(&labels));
        assert!(Selector::parse("env in (dev, prod)").unwrap().matches(&labels));
        assert!(!Selector::parse("tier notin (web,api)").unwrap().matches(&labels));
        assert!(Selector::parse("tier").unwrap().matches(&labels));
        assert!(Selector::parse("!gpu").unwrap().matches(&labels));
        assert!(!Selector::parse("!env").unwrap().matches(&labels));
        assert!(Selector::parse("gpu!=true").unwrap().matches(&labels));
    }

    #[test]
    fn display_round_trips_canonical_form() {
        let sel = Selector::parse("env in (a,b), !gpu,tier==web").unwrap();
        assert_eq!(sel.to_string(), "env in (a,b),!gpu,tier=web");
    }

    #[test]
    fn malformed_selector_is_bad_request_with_raw_text() {
        let err = Selector::parse("env in prod)").unwrap_err();
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("env in prod)"));
        assert!(Selector::parse("bad key=x").is_err());
        assert!(Selector::parse("env in ()").is_err());
    }
}
