//! `${{ ... }}` template expansion
//!
//! Matrix references are substituted when a job is expanded into instances.
//! Everything else (env, step outputs, runtime) is rendered right before a
//! step runs, against that instance's context.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

const MATRIX_PREFIX: &str = "matrix.";

fn expression_regex() -> &'static Regex {
    static EXPRESSION: OnceLock<Regex> = OnceLock::new();
    EXPRESSION.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("template regex is valid")
    })
}

/// All references (`matrix.version`, `env.HOME`, ...) in a template, in order
pub fn references(input: &str) -> Vec<String> {
    expression_regex()
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute `matrix.*` references from an axis assignment.
///
/// Returns the offending reference when an axis is not defined. Other
/// references are left untouched.
pub fn expand_matrix(input: &str, values: &[(String, String)]) -> Result<String, String> {
    let mut missing = None;
    let expanded = expression_regex().replace_all(input, |caps: &Captures| {
        let reference = &caps[1];
        match reference.strip_prefix(MATRIX_PREFIX) {
            Some(axis) => match values.iter().find(|(name, _)| name == axis) {
                Some((_, value)) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| reference.to_string());
                    caps[0].to_string()
                }
            },
            None => caps[0].to_string(),
        }
    });

    match missing {
        Some(reference) => Err(reference),
        None => Ok(expanded.into_owned()),
    }
}

/// Render every reference from the given variables.
///
/// Unresolved references render as the empty string.
pub fn render(input: &str, variables: &HashMap<String, String>) -> String {
    expression_regex()
        .replace_all(input, |caps: &Captures| {
            let reference = &caps[1];
            match variables.get(reference) {
                Some(value) => value.clone(),
                None => {
                    warn!("Unresolved template reference '{}'", reference);
                    String::new()
                }
            }
        })
        .into_owned()
}
