use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::models::UsageEvent;
use crate::tags::DatabaseTagSet;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "base_prompt")]
    pub base_prompt: String,
    #[serde(default, alias = "suggested_tags")]
    pub suggested_tags: DatabaseTagSet,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "recommended_model")]
    pub recommended_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "aspect_ratio")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, alias = "usage_count")]
    pub usage_count: i64,
    #[serde(default, alias = "rating_avg")]
    pub rating_avg: f64,
    #[serde(default, alias = "rating_count")]
    pub rating_count: i64,
    #[serde(default = "default_public", alias = "is_public")]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TemplatesFile {
    #[serde(default)]
    pub templates: Vec<SceneTemplate>,
}

// Placeholders without a value collapse to their bare name.
pub fn render_base_prompt(base_prompt: &str, variables: &HashMap<String, String>) -> String {
    let rendered = PLACEHOLDER_RE.replace_all(base_prompt, |caps: &Captures| {
        let name = &caps[1];
        match variables.get(name).map(|value| value.trim()) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => {
                debug!("No value for template placeholder '{}'", name);
                name.to_string()
            }
        }
    });
    rendered.trim().to_string()
}

pub trait TemplateApplier: Send + Sync {
    fn base_prompt(&self, template: &SceneTemplate, variables: &HashMap<String, String>) -> String {
        render_base_prompt(&template.base_prompt, variables)
    }

    // Must not block on storage.
    fn record_usage(&self, event: UsageEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let mut variables = HashMap::new();
        variables.insert("subject".to_string(), "red panda".to_string());
        assert_eq!(
            render_base_prompt("a {subject} in a {place}", &variables),
            "a red panda in a place"
        );
    }

    #[test]
    fn blank_values_fall_back_to_placeholder_name() {
        let mut variables = HashMap::new();
        variables.insert("subject".to_string(), "  ".to_string());
        assert_eq!(render_base_prompt("{subject} at dusk", &variables), "subject at dusk");
        assert_eq!(render_base_prompt("no placeholders {}", &variables), "no placeholders {}");
    }

    #[test]
    fn template_json_defaults_missing_fields() {
        let template: SceneTemplate = serde_json::from_str(
            r#"{"id":"t1","name":"Night Market","suggestedTags":{"mood":["dark"]}}"#,
        )
        .unwrap();
        assert!(template.is_public);
        assert_eq!(template.usage_count, 0);
        assert_eq!(template.suggested_tags["mood"], vec!["dark".to_string()]);
    }
}
