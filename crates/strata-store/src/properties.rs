//! `${name}` token substitution for init scripts.

use std::collections::BTreeMap;

/// Named values injected into scripts before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
    /// Property name -> environment variable, resolved at injection time.
    env: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a literal property value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Resolve `name` from the environment variable `var` when injecting.
    ///
    /// Literal values set with [`Properties::with`] take precedence.
    pub fn with_env(mut self, name: impl Into<String>, var: impl Into<String>) -> Self {
        self.env.insert(name.into(), var.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.env.is_empty()
    }

    /// Look up a property, falling back to its environment binding.
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        self.env
            .get(name)
            .and_then(|var| std::env::var(var).ok())
    }

    /// Replace every `${name}` token in `text` with its value.
    ///
    /// Unknown tokens are left untouched.
    pub fn inject(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut unresolved = Vec::new();

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.get(name) {
                        Some(value) => out.push_str(&value),
                        None => {
                            unresolved.push(name.to_string());
                            out.push_str(&rest[start..start + 2 + end + 1]);
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);

        if !unresolved.is_empty() {
            tracing::warn!(tokens = ?unresolved, "unresolved properties left in script");
        }
        out
    }
}
