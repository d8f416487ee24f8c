//! Environment Variables
//!
//! Ordered environment maps plus `$VAR` / `${VAR}` expansion of user supplied
//! configuration values.

use std::collections::BTreeMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static MACRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("macro pattern is valid")
});

/// Environment variable map with a stable iteration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvVars {
    vars: BTreeMap<String, String>,
}

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Builder flavour of [`EnvVars::put`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    /// Copy every entry of `other` over this map
    pub fn overlay(&mut self, other: &EnvVars) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Trim a value, mapping blank strings to `None`
pub fn fix_empty_and_trim(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Replace `$NAME` and `${NAME}` references found in `vars`.
///
/// References to unknown variables are left untouched so callers can detect
/// them with [`has_unresolved`].
pub fn replace_macro(value: &str, vars: &EnvVars) -> String {
    MACRO
        .replace_all(value, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match vars.get(name) {
                Some(resolved) => resolved.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Expand a configuration token against the node environment and, for matrix
/// builds, the axis values (which take priority).
pub fn expand_variables(
    env: &EnvVars,
    build_vars: Option<&BTreeMap<String, String>>,
    token: Option<&str>,
) -> Option<String> {
    let mut vars = env.clone();
    if let Some(build_vars) = build_vars {
        for (key, value) in build_vars {
            vars.put(key.clone(), value.clone());
        }
    }

    let token = fix_empty_and_trim(token)?;
    fix_empty_and_trim(Some(&replace_macro(&token, &vars)))
}

/// True if the value still contains a variable reference
pub fn has_unresolved(value: &str) -> bool {
    value.contains('$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_macro_both_forms() {
        let env = EnvVars::new().with("API", "30").with("ABI", "x86_64");
        assert_eq!(replace_macro("android-$API", &env), "android-30");
        assert_eq!(replace_macro("${ABI}_img", &env), "x86_64_img");
    }

    #[test]
    fn test_unknown_variables_are_kept() {
        let env = EnvVars::new().with("API", "30");
        let expanded = replace_macro("$API-${MISSING}", &env);
        assert_eq!(expanded, "30-${MISSING}");
        assert!(has_unresolved(&expanded));
    }

    #[test]
    fn test_axis_values_override_environment() {
        let env = EnvVars::new().with("API", "29");
        let mut axes = BTreeMap::new();
        axes.insert("API".to_string(), "33".to_string());

        assert_eq!(expand_variables(&env, Some(&axes), Some(" $API ")), Some("33".to_string()));
        assert_eq!(expand_variables(&env, None, Some("   ")), None);
        assert_eq!(expand_variables(&env, None, None), None);
    }

    #[test]
    fn test_overlay() {
        let mut base = EnvVars::new().with("A", "1").with("B", "2");
        base.overlay(&EnvVars::new().with("B", "3"));
        assert_eq!(base.get("B"), Some("3"));
        assert_eq!(base.len(), 2);
    }
}
