//! Environment store: the `$name` bindings shared by every test case
//! of a run.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z0-9_]+)").expect("failed to compile variable regex")
});

/// Mutable `name -> text` bindings.
///
/// Written only through [`Environment::set`] (normally by the action
/// binder) and read through [`Environment::substitute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(key, value)` pairs; later pairs win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::new();
        for (key, value) in pairs {
            env.set(key, value);
        }
        env
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Independent copy for a concurrent unit of work. Writes to the
    /// fork are never merged back.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Replace every `$name` in `text` with its bound value.
    ///
    /// Unbound names are left as-is and reported with a warning.
    /// Replacement text is not scanned again, so a value that itself
    /// contains `$other` stays literal.
    pub fn substitute(&self, text: &str) -> String {
        let (expanded, missing) = self.substitute_reporting(text);
        for name in missing {
            warn!("Environment variable ${} not found", name);
        }
        expanded
    }

    /// Like [`Environment::substitute`] but hands back the unbound
    /// names instead of logging them.
    pub fn substitute_reporting(&self, text: &str) -> (String, Vec<String>) {
        let mut missing = Vec::new();
        let expanded = VAR_RE
            .replace_all(text, |caps: &Captures| {
                let name = &caps[1];
                match self.vars.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        if !missing.iter().any(|m| m == name) {
                            missing.push(name.to_string());
                        }
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();
        (expanded, missing)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}
