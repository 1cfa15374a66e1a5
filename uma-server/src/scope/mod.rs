//! Scope catalog: structured-scope parsing, reserved/restricted filtering
//! and scope-containment matching

use crate::models::{SystemScope, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID, SCOPE_REGISTRATION, SCOPE_UMA_PROTECTION};
use std::collections::{HashMap, HashSet};

/// The scopes known to this server.
///
/// A structured scope is granted at its base value (`resource`) and checked
/// at an instance value (`resource:42`); its identity for lookups is the base.
#[derive(Debug, Clone)]
pub struct ScopeCatalog {
    by_value: HashMap<String, SystemScope>,
}

impl ScopeCatalog {
    /// Catalog with the built-in server scopes only
    pub fn new() -> Self {
        let mut catalog = Self {
            by_value: HashMap::new(),
        };
        let mut openid = SystemScope::new(SCOPE_OPENID);
        openid.default_scope = true;
        catalog.add(openid);
        catalog.add(SystemScope::new(SCOPE_OFFLINE_ACCESS));
        catalog.add(SystemScope::restricted(SCOPE_REGISTRATION));
        catalog.add(SystemScope::restricted(SCOPE_UMA_PROTECTION));
        catalog
    }

    /// Catalog with the built-ins plus additional configured scopes
    pub fn with_scopes(extra: Vec<SystemScope>) -> Self {
        let mut catalog = Self::new();
        for scope in extra {
            catalog.add(scope);
        }
        catalog
    }

    pub fn add(&mut self, scope: SystemScope) {
        self.by_value.insert(scope.value.clone(), scope);
    }

    pub fn get(&self, value: &str) -> Option<&SystemScope> {
        self.by_value.get(value)
    }

    /// Scopes granted when a request names none
    pub fn default_scopes(&self) -> HashSet<String> {
        self.by_value
            .values()
            .filter(|s| s.default_scope)
            .map(|s| s.value.clone())
            .collect()
    }

    /// Parse one wire-form scope string.
    ///
    /// The prefix before `:` is looked up against the known scopes; an
    /// unknown prefix falls back to a synthetic structured scope. Empty
    /// input parses to nothing.
    pub fn parse(&self, raw: &str) -> Option<SystemScope> {
        if raw.is_empty() {
            return None;
        }
        let (base, suffix) = match raw.split_once(':') {
            Some((base, suffix)) if !base.is_empty() => (base, Some(suffix)),
            Some(_) => return None,
            None => (raw, None),
        };
        match self.by_value.get(base) {
            Some(known) if known.structured => {
                let mut scope = known.clone();
                scope.structured_value = suffix.filter(|s| !s.is_empty()).map(str::to_string);
                Some(scope)
            }
            Some(known) => Some(known.clone()),
            None => {
                let mut scope = SystemScope::structured(base);
                scope.structured_value = suffix.filter(|s| !s.is_empty()).map(str::to_string);
                Some(scope)
            }
        }
    }

    pub fn from_strings(&self, raw: &HashSet<String>) -> HashSet<SystemScope> {
        raw.iter().filter_map(|s| self.parse(s)).collect()
    }

    pub fn to_strings(&self, scopes: &HashSet<SystemScope>) -> HashSet<String> {
        scopes.iter().map(Self::unparse).collect()
    }

    /// Wire form of a scope: `base:value` when a structured value is set
    pub fn unparse(scope: &SystemScope) -> String {
        match &scope.structured_value {
            Some(value) if scope.structured && !value.is_empty() => {
                format!("{}:{}", scope.value, value)
            }
            _ => scope.value.clone(),
        }
    }

    /// Check that every scope in `actual` is covered by `expected`.
    ///
    /// A scope is covered by exact presence, or, for a structured scope with
    /// a value, by presence of its base. Fails on the first uncovered scope,
    /// so a coarse grant (`resource`) satisfies a finer request
    /// (`resource:42`) without enumerating instance values.
    pub fn scopes_match(&self, expected: &HashSet<String>, actual: &HashSet<String>) -> bool {
        for raw in actual {
            if expected.contains(raw) {
                continue;
            }
            let covered = match self.parse(raw) {
                Some(scope) => {
                    scope.structured
                        && scope.structured_value.as_deref().is_some_and(|v| !v.is_empty())
                        && expected.contains(&scope.value)
                }
                None => false,
            };
            if !covered {
                return false;
            }
        }
        true
    }

    /// Whether a base value is one of the reserved server scopes
    pub fn is_reserved(value: &str) -> bool {
        value == SCOPE_REGISTRATION || value == SCOPE_UMA_PROTECTION
    }

    fn is_restricted(&self, scope: &SystemScope) -> bool {
        scope.restricted
            || self
                .by_value
                .get(&scope.value)
                .is_some_and(|known| known.restricted)
    }

    pub fn remove_reserved_scopes(&self, scopes: HashSet<SystemScope>) -> HashSet<SystemScope> {
        scopes
            .into_iter()
            .filter(|s| !Self::is_reserved(&s.value))
            .collect()
    }

    pub fn remove_restricted_and_reserved_scopes(
        &self,
        scopes: HashSet<SystemScope>,
    ) -> HashSet<SystemScope> {
        scopes
            .into_iter()
            .filter(|s| !Self::is_reserved(&s.value) && !self.is_restricted(s))
            .collect()
    }

    /// String-set form of [`Self::remove_reserved_scopes`]
    pub fn strip_reserved(&self, raw: &HashSet<String>) -> HashSet<String> {
        let parsed = self.remove_reserved_scopes(self.from_strings(raw));
        self.to_strings(&parsed)
    }

    /// String-set form of [`Self::remove_restricted_and_reserved_scopes`]
    pub fn strip_restricted_and_reserved(&self, raw: &HashSet<String>) -> HashSet<String> {
        let parsed = self.remove_restricted_and_reserved_scopes(self.from_strings(raw));
        self.to_strings(&parsed)
    }
}

impl Default for ScopeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a space-separated scope parameter into a set
pub fn split_scope_param(raw: &str) -> HashSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Join a scope set into the space-separated wire form
pub fn join_scope_param(scopes: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(" ")
}
