// Tera-backed prompt rendering with raw-template fallback

use serde_json::{Map, Value};
use std::error::Error as StdError;
use tera::{Context, Tera};

pub type VariableMap = Map<String, Value>;

/// Why a render failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The template references variables absent from the context
    MissingVariables(String),
    /// Syntax or evaluation error unrelated to missing variables
    Invalid(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::MissingVariables(msg) => write!(f, "missing variables: {}", msg),
            RenderError::Invalid(msg) => write!(f, "invalid template: {}", msg),
        }
    }
}

/// Stateless renderer for one-off prompt templates
pub struct PromptEngine;

impl PromptEngine {
    /// Render `template` against `variables`
    pub fn render(template: &str, variables: &VariableMap) -> Result<String, RenderError> {
        let mut context = Context::new();
        for (key, value) in variables {
            context.insert(key.as_str(), value);
        }

        Tera::one_off(template, &context, false).map_err(|e| classify(&e))
    }

    /// Render, falling back to the raw template when only variables are missing.
    /// Other template errors are returned.
    pub fn render_or_raw(template: &str, variables: &VariableMap) -> Result<String, RenderError> {
        match Self::render(template, variables) {
            Ok(rendered) => Ok(rendered),
            Err(RenderError::MissingVariables(detail)) => {
                log::debug!("Prompt left unrendered, {}", detail);
                Ok(template.to_string())
            }
            Err(other) => Err(other),
        }
    }
}

fn classify(err: &tera::Error) -> RenderError {
    let mut messages = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        messages.push(e.to_string());
        current = e.source();
    }

    match messages.iter().find(|m| m.contains("not found in context")) {
        Some(missing) => RenderError::MissingVariables(missing.clone()),
        None => RenderError::Invalid(messages.join(": ")),
    }
}

/// Add `current_date` (plus the legacy alias `current_data`), `agent_name`
/// and `agent_type` to `variables` without overwriting keys already present.
pub fn inject_standard_variables(variables: &mut VariableMap, agent_name: &str, agent_type: &str) {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let injected = [
        ("current_date", today.clone()),
        ("current_data", today),
        ("agent_name", agent_name.to_string()),
        ("agent_type", agent_type.to_string()),
    ];
    for (key, value) in injected {
        variables
            .entry(key.to_string())
            .or_insert(Value::String(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> VariableMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_variables() {
        let out = PromptEngine::render(
            "You are {{ role }} for {{ team }}.",
            &vars(&[("role", json!("a reviewer")), ("team", json!("infra"))]),
        )
        .unwrap();
        assert_eq!(out, "You are a reviewer for infra.");
    }

    #[test]
    fn test_missing_variable_is_classified() {
        let err = PromptEngine::render("Hello {{ name }}", &VariableMap::new()).unwrap_err();
        assert!(matches!(err, RenderError::MissingVariables(_)));
    }

    #[test]
    fn test_render_or_raw_falls_back() {
        let template = "Region: {{ region }}";
        let out = PromptEngine::render_or_raw(template, &VariableMap::new()).unwrap();
        assert_eq!(out, template);
    }

    #[test]
    fn test_syntax_error_is_not_swallowed() {
        let err = PromptEngine::render_or_raw("{% if %}", &VariableMap::new()).unwrap_err();
        assert!(matches!(err, RenderError::Invalid(_)));
    }

    #[test]
    fn test_injected_variables_do_not_override_config() {
        let mut variables = vars(&[("agent_name", json!("custom"))]);
        inject_standard_variables(&mut variables, "writer", "chat");
        assert_eq!(variables["agent_name"], json!("custom"));
        assert_eq!(variables["agent_type"], json!("chat"));
        assert_eq!(variables["current_date"], variables["current_data"]);
    }
}
