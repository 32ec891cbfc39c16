//! Command-line templates with `{NAME}` placeholders
//!
//! A template is parsed once from the command table and turned into a
//! concrete argument vector for every invocation. Substitution is plain text
//! replacement; values must already be safe for whatever shell eventually
//! sees them.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{ControlError, Result};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{([A-Z][A-Z0-9_]*)\}").expect("placeholder pattern is valid");
}

/// Values substituted into templates, keyed by placeholder name without braces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacement {
    values: HashMap<String, String>,
}

impl Replacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single value, replacing any previous one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge `other` into `self`.
    ///
    /// With `override_existing` the incoming values win on key collision,
    /// otherwise values already present are kept.
    pub fn merge(&mut self, other: Replacement, override_existing: bool) {
        for (key, value) in other.values {
            if override_existing {
                self.values.insert(key, value);
            } else {
                self.values.entry(key).or_insert(value);
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Replacement
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A parsed argument-vector template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgvTemplate {
    tokens: Vec<String>,
}

impl ArgvTemplate {
    /// Parse a template from its JSON form, a non-empty array of strings
    pub fn parse(value: &Value) -> Result<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| ControlError::Template(format!("expected an array, got {}", value)))?;

        if array.is_empty() {
            return Err(ControlError::Template("empty argv".to_string()));
        }

        let tokens = array
            .iter()
            .map(|token| {
                token
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ControlError::Template(format!("non-string token {}", token)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { tokens })
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Substitute every placeholder and return the concrete argv
    pub fn generate(&self, replacement: &Replacement) -> Result<Vec<String>> {
        self.tokens
            .iter()
            .map(|token| substitute(token, replacement))
            .collect()
    }
}

impl fmt::Display for ArgvTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

fn substitute(token: &str, replacement: &Replacement) -> Result<String> {
    let mut missing: Option<String> = None;

    let output = PLACEHOLDER.replace_all(token, |caps: &Captures| {
        let name = &caps[1];
        match replacement.get(name) {
            Some(value) => value.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(placeholder) => Err(ControlError::UnresolvedPlaceholder {
            placeholder,
            token: token.to_string(),
        }),
        None => Ok(output.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn click_template() -> ArgvTemplate {
        ArgvTemplate::parse(&json!(["{ADB}", "-s", "{ADB_SERIAL}", "shell", "input tap {X} {Y}"]))
            .unwrap()
    }

    #[test]
    fn test_generate_is_deterministic() {
        let template = click_template();
        let replacement: Replacement = [
            ("ADB", "adb"),
            ("ADB_SERIAL", "127.0.0.1:5555"),
            ("X", "10"),
            ("Y", "20"),
        ]
        .into_iter()
        .collect();

        let first = template.generate(&replacement).unwrap();
        let second = template.generate(&replacement).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec!["adb", "-s", "127.0.0.1:5555", "shell", "input tap 10 20"]
        );
    }

    #[test]
    fn test_unresolved_placeholder_fails() {
        let template = click_template();
        let replacement: Replacement = [("ADB", "adb"), ("ADB_SERIAL", "emulator-5554"), ("X", "1")]
            .into_iter()
            .collect();

        for _ in 0..2 {
            match template.generate(&replacement) {
                Err(ControlError::UnresolvedPlaceholder { placeholder, token }) => {
                    assert_eq!(placeholder, "Y");
                    assert_eq!(token, "input tap {X} {Y}");
                }
                other => panic!("expected unresolved placeholder, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let template = ArgvTemplate::from_tokens(["am start -n {INTENT}"]);
        let replacement: Replacement = [("INTENT", "{X}")].into_iter().collect();
        assert_eq!(template.generate(&replacement).unwrap(), vec!["am start -n {X}"]);
    }

    #[test]
    fn test_shell_syntax_is_not_a_placeholder() {
        let template = ArgvTemplate::from_tokens(["grep -o -E cur=+[^\\ ]+ | awk '{print $1}'"]);
        let generated = template.generate(&Replacement::new()).unwrap();
        assert_eq!(generated[0], "grep -o -E cur=+[^\\ ]+ | awk '{print $1}'");
    }

    #[test]
    fn test_merge_override() {
        let mut a: Replacement = [("ADB", "adb"), ("X", "1")].into_iter().collect();
        let b: Replacement = [("X", "2"), ("Y", "3")].into_iter().collect();
        a.merge(b, true);
        assert_eq!(a.get("X"), Some("2"));
        assert_eq!(a.get("Y"), Some("3"));
        assert_eq!(a.get("ADB"), Some("adb"));
    }

    #[test]
    fn test_merge_keep_existing() {
        let mut a: Replacement = [("ADB", "adb"), ("X", "1")].into_iter().collect();
        let b: Replacement = [("X", "2"), ("Y", "3")].into_iter().collect();
        a.merge(b, false);
        assert_eq!(a.get("X"), Some("1"));
        assert_eq!(a.get("Y"), Some("3"));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            ArgvTemplate::parse(&json!("adb devices")),
            Err(ControlError::Template(_))
        ));
        assert!(matches!(
            ArgvTemplate::parse(&json!([])),
            Err(ControlError::Template(_))
        ));
        assert!(matches!(
            ArgvTemplate::parse(&json!(["adb", 1])),
            Err(ControlError::Template(_))
        ));
    }
}
