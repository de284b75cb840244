use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tags::catalog::{Tag, TagCategory};
use crate::tags::index::TagIndex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneTagSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technical: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub composition: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enhancement: Vec<String>,
}

impl SceneTagSet {
    pub fn is_empty(&self) -> bool {
        self.art_style.is_none()
            && self.theme_style.is_none()
            && self.mood.is_none()
            && self.technical.is_empty()
            && self.composition.is_empty()
            && self.enhancement.is_empty()
    }

    fn entries(&self) -> Vec<(TagCategory, Vec<&str>)> {
        vec![
            (TagCategory::ArtStyle, self.art_style.iter().map(String::as_str).collect()),
            (TagCategory::ThemeStyle, self.theme_style.iter().map(String::as_str).collect()),
            (TagCategory::Mood, self.mood.iter().map(String::as_str).collect()),
            (TagCategory::Technical, self.technical.iter().map(String::as_str).collect()),
            (TagCategory::Composition, self.composition.iter().map(String::as_str).collect()),
            (TagCategory::Enhancement, self.enhancement.iter().map(String::as_str).collect()),
        ]
    }
}

pub type DatabaseTagSet = HashMap<String, Vec<String>>;

const DATABASE_CATEGORY_ORDER: [TagCategory; 7] = TagCategory::ALL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedTag {
    pub category: TagCategory,
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

impl From<&Tag> for ExpandedTag {
    fn from(tag: &Tag) -> Self {
        ExpandedTag {
            category: tag.category,
            label: tag.label.to_string(),
            value: tag.value.to_string(),
            display_value: tag.display_value.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagExpansionResult {
    pub expanded_tags: Vec<ExpandedTag>,
    pub prompt: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedTag {
    pub field: String,
    pub value: String,
}

#[derive(Default)]
struct ExpansionBuilder {
    result: TagExpansionResult,
    parts: Vec<String>,
    seen: HashSet<(TagCategory, String)>,
}

impl ExpansionBuilder {
    fn resolved(&mut self, tag: &Tag) {
        if !self.seen.insert((tag.category, tag.value.to_string())) {
            debug!("Skipping repeated tag {}={}", tag.category, tag.label);
            return;
        }
        self.parts.push(tag.value.to_string());
        self.result.expanded_tags.push(ExpandedTag::from(tag));
    }

    fn unresolved(&mut self, field: &str, value: &str) {
        self.result
            .warnings
            .push(format!("tag not found: {field}=\"{value}\""));
        self.parts.push(value.to_string());
    }

    fn finish(mut self) -> TagExpansionResult {
        self.result.prompt = self.parts.join(", ");
        if !self.result.warnings.is_empty() {
            warn!(
                "Tag expansion produced {} warning(s): {}",
                self.result.warnings.len(),
                self.result.warnings.join("; ")
            );
        }
        self.result
    }
}

#[derive(Debug, Clone)]
pub struct TagMappingService {
    index: Arc<TagIndex>,
}

impl TagMappingService {
    pub fn new(index: Arc<TagIndex>) -> Self {
        Self { index }
    }

    pub fn expand(&self, simplified_value: &str, category: TagCategory) -> Option<ExpandedTag> {
        self.index
            .lookup(simplified_value, category)
            .map(ExpandedTag::from)
    }

    pub fn expand_tag_set(&self, tags: &SceneTagSet) -> TagExpansionResult {
        let mut builder = ExpansionBuilder::default();
        for (category, values) in tags.entries() {
            self.expand_values(&mut builder, category, category.field_name(), &values);
        }
        builder.finish()
    }

    pub fn expand_database_tag_set(&self, tags: &DatabaseTagSet) -> TagExpansionResult {
        let mut builder = ExpansionBuilder::default();

        let mut keys = tags.keys().collect::<Vec<_>>();
        keys.sort();
        let (known, unknown): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .map(|key| (TagCategory::from_key(key), key))
            .partition(|(category, _)| category.is_some());

        for category in DATABASE_CATEGORY_ORDER {
            for (_, key) in known.iter().filter(|(found, _)| *found == Some(category)) {
                let values = tags[*key].iter().map(String::as_str).collect::<Vec<_>>();
                self.expand_values(&mut builder, category, category.as_str(), &values);
            }
        }

        for (_, key) in unknown {
            builder
                .result
                .warnings
                .push(format!("unknown tag category: {key}"));
            for value in &tags[key] {
                let value = value.trim();
                if !value.is_empty() {
                    builder.parts.push(value.to_string());
                }
            }
        }

        builder.finish()
    }

    fn expand_values(
        &self,
        builder: &mut ExpansionBuilder,
        category: TagCategory,
        field: &str,
        values: &[&str],
    ) {
        for value in values {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match self.index.lookup(value, category) {
                Some(tag) => builder.resolved(tag),
                None => builder.unresolved(field, value),
            }
        }
    }

    pub fn build_full_prompt(
        &self,
        base_prompt: &str,
        tags: &SceneTagSet,
        custom_text: Option<&str>,
    ) -> String {
        let expansion = self.expand_tag_set(tags);
        join_prompt_parts(&[base_prompt, &expansion.prompt, custom_text.unwrap_or("")])
    }

    pub fn validate_tag_set(&self, tags: &SceneTagSet) -> Vec<UnresolvedTag> {
        let mut unresolved = Vec::new();
        for (category, values) in tags.entries() {
            for value in values {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                if self.index.lookup(value, category).is_none() {
                    unresolved.push(UnresolvedTag {
                        field: category.field_name().to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }
        unresolved
    }

    pub fn tags_for_category(&self, category: TagCategory) -> Vec<ExpandedTag> {
        self.index.tags_in(category).map(ExpandedTag::from).collect()
    }
}

pub fn join_prompt_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
