//! Variable substitution for HTTP templates and script bodies.
//!
//! Tokens have the form `{name}` where `name` is an identifier optionally
//! followed by dotted segments. Resolution order:
//!
//! 1. `{var.KEY}`: the descriptor's own variables (secrets included)
//! 2. `{arg}`: a top-level call argument
//! 3. `{a.b.c}`: a walk through nested argument objects
//! 4. `{env.NAME}`: the process environment
//!
//! Anything that does not resolve is left byte-for-byte in place, so JSON
//! braces and unknown placeholders pass through untouched.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_.]*)\}").ok());

/// Substitute tokens using the real process environment for `{env.*}`.
pub fn substitute(template: &str, variables: &HashMap<String, String>, arguments: &Value) -> String {
    substitute_with(template, variables, arguments, |name| std::env::var(name).ok())
}

/// Substitute tokens with a caller-supplied environment lookup.
pub fn substitute_with<F>(
    template: &str,
    variables: &HashMap<String, String>,
    arguments: &Value,
    env: F,
) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(token) = TOKEN.as_ref() else {
        return template.to_string();
    };
    token
        .replace_all(template, |caps: &Captures<'_>| {
            resolve(&caps[1], variables, arguments, &env).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Every distinct token name referenced by a template, sorted.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    TOKEN
        .iter()
        .flat_map(|token| token.captures_iter(template))
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn resolve<F>(token: &str, variables: &HashMap<String, String>, arguments: &Value, env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = token.strip_prefix("var.") {
        return variables.get(key).cloned();
    }
    if let Some(value) = arguments.get(token) {
        return Some(render(value));
    }
    if token.contains('.') {
        if let Some(value) = walk(arguments, token) {
            return Some(render(value));
        }
    }
    token.strip_prefix("env.").and_then(|name| env(name))
}

fn walk<'a>(arguments: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(arguments, |current, segment| current.as_object()?.get(segment))
}

/// Strings are inserted raw; everything else as its JSON text.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
