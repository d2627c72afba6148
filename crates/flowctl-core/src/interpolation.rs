// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The template interpolation engine (spec §4.2): `{{scope.path.to.value}}`
//! expressions over four fixed prefixes, with secret tracking for redaction.
//!
//! This is hand-rolled rather than built on a general templating crate — see
//! `SPEC_FULL.md` §B for why `handlebars` was dropped. The grammar here is
//! deliberately narrow: one substitution form, no helpers, no control flow.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::value::{format_for_string_context, JsonValue, SecretValues};

/// The four fixed expression prefixes (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Inputs(Vec<String>),
    Steps { step_id: String, path: Vec<String> },
    Env(String),
    Run(RunField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunField {
    Id,
    WorkflowId,
    StartedAt,
}

/// Path segments whose presence blocks the walk, per spec §4.2 — a defensive
/// measure against mutation-of-carrier attacks in host languages that use
/// prototype-like mappings. `serde_json::Map` has no such surface, but the
/// engine enforces the same contract so behavior matches across ports.
const BLOCKED_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// A read-only view of everything a template expression can reference.
pub struct TemplateScope<'a> {
    pub inputs: &'a HashMap<String, JsonValue>,
    pub steps: &'a HashMap<String, JsonValue>,
    pub env: &'a HashMap<String, String>,
    pub run_id: &'a str,
    pub workflow_id: &'a str,
    pub started_at: &'a str,
    pub secret_input_names: &'a HashSet<String>,
}

/// Parses a single expression (the text between `{{` and `}}`, trimmed).
pub fn parse_reference(expr: &str) -> Option<Reference> {
    let expr = expr.trim();
    let (prefix, rest) = expr.split_once('.')?;
    match prefix {
        "inputs" => Some(Reference::Inputs(split_path(rest))),
        "steps" => {
            let (step_id, path_rest) = rest.split_once('.')?;
            Some(Reference::Steps {
                step_id: step_id.to_string(),
                path: split_path(path_rest),
            })
        }
        "env" => Some(Reference::Env(rest.to_string())),
        "run" => match rest {
            "id" => Some(Reference::Run(RunField::Id)),
            "workflowId" => Some(Reference::Run(RunField::WorkflowId)),
            "startedAt" => Some(Reference::Run(RunField::StartedAt)),
            _ => None,
        },
        _ => None,
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(|s| s.to_string()).collect()
}

/// Walks `path` into `value`, returning `None` (and logging a warning) the
/// moment a blocked segment is encountered, otherwise `None` for any
/// ordinary missing key.
pub fn walk_path(value: &JsonValue, path: &[String]) -> Option<JsonValue> {
    let mut current = value.clone();
    for segment in path {
        if segment.is_empty() {
            continue;
        }
        if BLOCKED_SEGMENTS.contains(&segment.as_str()) {
            warn!(segment = %segment, "blocked path segment in template expression");
            return None;
        }
        current = match current {
            JsonValue::Object(ref map) => map.get(segment)?.clone(),
            JsonValue::Array(ref arr) => {
                let index: usize = segment.parse().ok()?;
                arr.get(index)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves a single reference against a scope. Returns `None` when the
/// value is undefined anywhere along the path.
pub fn resolve_reference(scope: &TemplateScope, reference: &Reference) -> Option<JsonValue> {
    match reference {
        Reference::Inputs(path) => {
            if path.is_empty() {
                return None;
            }
            let root = scope.inputs.get(&path[0])?;
            if path.len() == 1 {
                Some(root.clone())
            } else {
                walk_path(root, &path[1..])
            }
        }
        Reference::Steps { step_id, path } => {
            let root = scope.steps.get(step_id)?;
            if path.is_empty() {
                Some(root.clone())
            } else {
                walk_path(root, path)
            }
        }
        Reference::Env(key) => scope.env.get(key).map(|v| JsonValue::String(v.clone())),
        Reference::Run(field) => Some(JsonValue::String(
            match field {
                RunField::Id => scope.run_id.to_string(),
                RunField::WorkflowId => scope.workflow_id.to_string(),
                RunField::StartedAt => scope.started_at.to_string(),
            },
        )),
    }
}

/// Every `env.*` reference is a secret; every `inputs.<name>` reference is a
/// secret iff `<name>` is in the workflow's `secrets` set (spec §6.3).
pub fn is_secret_reference(scope: &TemplateScope, reference: &Reference) -> bool {
    match reference {
        Reference::Env(_) => true,
        Reference::Inputs(path) => path
            .first()
            .map(|name| scope.secret_input_names.contains(name))
            .unwrap_or(false),
        _ => false,
    }
}

/// Extracts the raw `{{...}}` expression strings from a template, in order.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_start = &rest[start + 2..];
        if let Some(end) = after_start.find("}}") {
            out.push(after_start[..end].trim().to_string());
            rest = &after_start[end + 2..];
        } else {
            break;
        }
    }
    out
}

/// Returns references in `template` whose value is undefined in `scope`
/// (spec §4.2, `validateInterpolation`), for compile-time link validation.
pub fn validate_interpolation(template: &str, scope: &TemplateScope) -> Vec<String> {
    extract_variables(template)
        .into_iter()
        .filter(|expr| {
            let Some(reference) = parse_reference(expr) else {
                return true;
            };
            resolve_reference(scope, &reference).is_none()
        })
        .collect()
}

/// Whether `template`'s entire text is exactly one `{{expr}}` expression
/// (spec §4.1's "type-preservation rule").
fn is_single_expression(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// The outcome of resolving a template field: the real (unmasked) value to
/// hand to a handler, and the set of secret string values it is built from.
pub struct Resolved {
    pub value: JsonValue,
    pub secrets: SecretValues,
}

/// Resolves `template` against `scope`, preserving the resolved type when
/// the template is a single bare expression, otherwise producing a string
/// with every expression substituted in its string-context form.
pub fn resolve_template(template: &str, scope: &TemplateScope) -> Resolved {
    let mut secrets = SecretValues::new();

    if let Some(inner) = is_single_expression(template) {
        let Some(reference) = parse_reference(inner) else {
            return Resolved {
                value: JsonValue::Null,
                secrets,
            };
        };
        let value = resolve_reference(scope, &reference).unwrap_or(JsonValue::Null);
        if is_secret_reference(scope, &reference) {
            secrets.insert(format_for_string_context(&value));
        }
        return Resolved { value, secrets };
    }

    let mut result = String::new();
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                result.push_str(rest);
                break;
            }
            Some(start) => {
                result.push_str(&rest[..start]);
                let after_start = &rest[start + 2..];
                match after_start.find("}}") {
                    None => {
                        result.push_str("{{");
                        result.push_str(after_start);
                        break;
                    }
                    Some(end) => {
                        let expr = after_start[..end].trim();
                        let resolved = parse_reference(expr)
                            .and_then(|reference| {
                                let value = resolve_reference(scope, &reference)?;
                                if is_secret_reference(scope, &reference) {
                                    secrets.insert(format_for_string_context(&value));
                                }
                                Some(value)
                            })
                            .unwrap_or(JsonValue::Null);
                        result.push_str(&format_for_string_context(&resolved));
                        rest = &after_start[end + 2..];
                    }
                }
            }
        }
    }

    Resolved {
        value: JsonValue::String(result),
        secrets,
    }
}

/// Convenience wrapper for fields that must resolve to a string regardless
/// of type-preservation (e.g. a shell command).
pub fn resolve_template_string(template: &str, scope: &TemplateScope) -> (String, SecretValues) {
    let resolved = resolve_template(template, scope);
    (format_for_string_context(&resolved.value), resolved.secrets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope<'a>(
        inputs: &'a HashMap<String, JsonValue>,
        steps: &'a HashMap<String, JsonValue>,
        env: &'a HashMap<String, String>,
        secret_input_names: &'a HashSet<String>,
    ) -> TemplateScope<'a> {
        TemplateScope {
            inputs,
            steps,
            env,
            run_id: "run-1",
            workflow_id: "wf-1",
            started_at: "2026-01-01T00:00:00Z",
            secret_input_names,
        }
    }

    #[test]
    fn type_preservation_for_single_expression() {
        let mut inputs = HashMap::new();
        inputs.insert("count".to_string(), json!(42));
        let steps = HashMap::new();
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("{{inputs.count}}", &s);
        assert_eq!(resolved.value, json!(42));
    }

    #[test]
    fn mixed_text_always_resolves_to_string() {
        let mut inputs = HashMap::new();
        inputs.insert("count".to_string(), json!(42));
        let steps = HashMap::new();
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("count={{inputs.count}}", &s);
        assert_eq!(resolved.value, json!("count=42"));
    }

    #[test]
    fn env_is_always_a_secret() {
        let inputs = HashMap::new();
        let steps = HashMap::new();
        let mut env = HashMap::new();
        env.insert("TOKEN".to_string(), "abcdef".to_string());
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("Bearer {{env.TOKEN}}", &s);
        assert!(!resolved.secrets.is_empty());
        let masked = resolved.secrets.mask(resolved.value.as_str().unwrap());
        assert!(!masked.contains("abcdef"));
    }

    #[test]
    fn declared_secret_input_is_tracked() {
        let mut inputs = HashMap::new();
        inputs.insert("password".to_string(), json!("s3cr3t"));
        let steps = HashMap::new();
        let env = HashMap::new();
        let mut secret_names = HashSet::new();
        secret_names.insert("password".to_string());
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("pass={{inputs.password}}", &s);
        assert!(resolved.secrets.contains_in("pass=s3cr3t"));
    }

    #[test]
    fn non_secret_input_is_not_tracked() {
        let mut inputs = HashMap::new();
        inputs.insert("name".to_string(), json!("alice"));
        let steps = HashMap::new();
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("{{inputs.name}}", &s);
        assert!(resolved.secrets.is_empty());
    }

    #[test]
    fn blocked_segment_resolves_to_undefined() {
        let mut inputs = HashMap::new();
        inputs.insert("obj".to_string(), json!({"__proto__": {"x": 1}}));
        let steps = HashMap::new();
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("{{inputs.obj.__proto__.x}}", &s);
        assert_eq!(resolved.value, JsonValue::Null);
    }

    #[test]
    fn extract_variables_finds_all_expressions() {
        let vars = extract_variables("{{inputs.a}} and {{steps.b.c}}");
        assert_eq!(vars, vec!["inputs.a".to_string(), "steps.b.c".to_string()]);
    }

    #[test]
    fn validate_interpolation_flags_undefined_references() {
        let inputs = HashMap::new();
        let steps = HashMap::new();
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let undefined = validate_interpolation("{{inputs.missing}}", &s);
        assert_eq!(undefined, vec!["inputs.missing".to_string()]);
    }

    #[test]
    fn steps_path_walks_nested_output() {
        let inputs = HashMap::new();
        let mut steps = HashMap::new();
        steps.insert("double".to_string(), json!({"result": 4}));
        let env = HashMap::new();
        let secret_names = HashSet::new();
        let s = scope(&inputs, &steps, &env, &secret_names);

        let resolved = resolve_template("{{steps.double.result}}", &s);
        assert_eq!(resolved.value, json!(4));
    }
}
