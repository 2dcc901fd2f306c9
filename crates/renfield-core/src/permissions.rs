//! Permission taxonomy and the single `require_permission` check point.
//!
//! §9's redesign note replaces decorator-based permission checks with one
//! function invoked at the top of each protected operation; this module is
//! that function plus the token model it operates on.
//!
//! Tokens are dot-separated strings from a fixed taxonomy
//! (`mcp.*`, `kb.all`, `ha.full`, `ha.control`, `ha.read`, ...) plus
//! dynamically discovered `mcp.<server>` and `mcp.<server>.<tool>` tokens
//! contributed by the Tool Registry as servers connect. A token ending in
//! `.*` implies every token sharing its prefix; a small fixed tier table
//! implies lower tiers (`ha.full` implies `ha.control` implies `ha.read`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Tier implications: holding the key implies holding every value.
/// Declared as a flat list rather than a map because lookups are small and
/// linear scan keeps this data trivially inspectable/loggable.
const TIER_IMPLICATIONS: &[(&str, &[&str])] = &[
    ("ha.full", &["ha.control", "ha.read"]),
    ("ha.control", &["ha.read"]),
    ("mcp.*", &[]), // handled by prefix-wildcard matching, not tier table
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(pub String);

impl Permission {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` (a token the caller holds) grants `required`.
    fn grants(&self, required: &Permission) -> bool {
        if self.0 == required.0 {
            return true;
        }

        // Wildcard: "mcp.*" grants "mcp.home.assistant", "mcp.home.assistant.call_service", etc.
        // "A.*" implies all "A.*.x" including "A.x" itself.
        if let Some(prefix) = self.0.strip_suffix(".*") {
            if required.0 == prefix || required.0.starts_with(&format!("{prefix}.")) {
                return true;
            }
        }

        // Tier implication, transitively.
        let mut frontier = vec![self.0.as_str()];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(tok) = frontier.pop() {
            if !seen.insert(tok) {
                continue;
            }
            if tok == required.0 {
                return true;
            }
            if let Some((_, implied)) = TIER_IMPLICATIONS.iter().find(|(k, _)| *k == tok) {
                frontier.extend(implied.iter().copied());
            }
        }

        false
    }
}

impl From<&str> for Permission {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A named bundle of permission tokens assigned to users (§3 Role, the
/// "Permission" sense of the glossary's overloaded "Role" term — not to be
/// confused with the Agent Router's routing "Role").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            name: name.into(),
            permissions,
        }
    }

    pub fn has(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|held| held.grants(required))
    }

    pub fn has_any(&self, required: &[Permission]) -> bool {
        required.iter().any(|r| self.has(r))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("permission denied: caller lacks {required}")]
pub struct PermissionDeniedError {
    pub required: String,
}

/// Single check point every protected operation calls. `auth_disabled` and
/// `caller` being `None` both short-circuit to permit, matching §4.7 step 2
/// ("If auth is globally disabled or caller is unidentified, permit").
pub fn require_permission(
    caller: Option<&Role>,
    required: &Permission,
    auth_disabled: bool,
) -> Result<(), PermissionDeniedError> {
    if auth_disabled {
        return Ok(());
    }
    let Some(role) = caller else {
        return Ok(());
    };
    if role.has(required) {
        Ok(())
    } else {
        Err(PermissionDeniedError {
            required: required.as_str().to_string(),
        })
    }
}

/// Same as `require_permission` but the caller passes any-of a set (used by
/// the Tool Registry's "require at least one of `permissions`" rule).
pub fn require_any_permission(
    caller: Option<&Role>,
    required: &[Permission],
    auth_disabled: bool,
) -> Result<(), PermissionDeniedError> {
    if auth_disabled || required.is_empty() {
        return Ok(());
    }
    let Some(role) = caller else {
        return Ok(());
    };
    if role.has_any(required) {
        Ok(())
    } else {
        Err(PermissionDeniedError {
            required: required
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_grants_nested_tokens() {
        let role = Role::new("admin", vec![Permission::new("mcp.*")]);
        assert!(role.has(&Permission::new("mcp.homeassistant")));
        assert!(role.has(&Permission::new("mcp.homeassistant.call_service")));
    }

    #[test]
    fn exact_match_without_wildcard() {
        let role = Role::new("viewer", vec![Permission::new("mcp.weather.get")]);
        assert!(role.has(&Permission::new("mcp.weather.get")));
        assert!(!role.has(&Permission::new("mcp.weather.set")));
    }

    #[test]
    fn tier_implication_chains() {
        let role = Role::new("operator", vec![Permission::new("ha.full")]);
        assert!(role.has(&Permission::new("ha.control")));
        assert!(role.has(&Permission::new("ha.read")));
    }

    #[test]
    fn auth_disabled_always_permits() {
        let result = require_permission(None, &Permission::new("mcp.x"), true);
        assert!(result.is_ok());
    }

    #[test]
    fn unidentified_caller_permits() {
        let result = require_permission(None, &Permission::new("mcp.x"), false);
        assert!(result.is_ok());
    }

    #[test]
    fn denies_without_matching_token() {
        let role = Role::new("guest", vec![Permission::new("kb.own")]);
        let result = require_permission(Some(&role), &Permission::new("mcp.weather.get"), false);
        assert!(result.is_err());
    }
}
