//! Capability-server manifest loading (§4.7): YAML parse plus `${VAR}` /
//! `${VAR:-default}` substitution against the process environment.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::types::ServerManifest;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    servers: Vec<ServerManifest>,
}

pub fn load_manifests(path: &str) -> Result<Vec<ServerManifest>> {
    let raw = std::fs::read_to_string(path).map_err(|e| ToolError::Manifest(format!("reading {path}: {e}")))?;
    let file: ManifestFile = serde_yaml::from_str(&raw).map_err(|e| ToolError::Manifest(format!("parsing {path}: {e}")))?;
    Ok(file
        .servers
        .into_iter()
        .map(|mut m| {
            m.command = m.command.into_iter().map(|arg| substitute(&arg, &std::env::vars().collect())).collect();
            for value in m.env.values_mut() {
                *value = substitute(value, &std::env::vars().collect());
            }
            m
        })
        .collect())
}

/// Substitutes `${VAR}` and `${VAR:-default}` tokens in `template` from
/// `env`. An unset `${VAR}` with no default is replaced with an empty
/// string rather than erroring — a missing optional credential shouldn't
/// block every other server from connecting.
pub fn substitute(template: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = template[i + 2..].find('}') {
                let inner = &template[i + 2..i + 2 + end];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match env.get(name) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(default.unwrap_or("")),
                }
                i = i + 2 + end + 1;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_plain_var() {
        let result = substitute("${HOME}/bin", &env(&[("HOME", "/root")]));
        assert_eq!(result, "/root/bin");
    }

    #[test]
    fn substitutes_default_when_unset() {
        let result = substitute("${PORT:-8080}", &env(&[]));
        assert_eq!(result, "8080");
    }

    #[test]
    fn prefers_set_value_over_default() {
        let result = substitute("${PORT:-8080}", &env(&[("PORT", "9090")]));
        assert_eq!(result, "9090");
    }

    #[test]
    fn unset_without_default_becomes_empty() {
        let result = substitute("token=${MISSING}", &env(&[]));
        assert_eq!(result, "token=");
    }

    #[test]
    fn leaves_text_without_placeholders_unchanged() {
        assert_eq!(substitute("no vars here", &env(&[])), "no vars here");
    }
}
