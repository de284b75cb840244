use std::collections::HashMap;

use tracing::debug;

use crate::tags::catalog::{first_phrase, Tag, TagCategory};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate {category} key '{key}' for tags '{existing}' and '{duplicate}'")]
    DuplicateKey {
        category: TagCategory,
        key: String,
        existing: String,
        duplicate: String,
    },
}

fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct TagIndex {
    tags: Vec<Tag>,
    keys: HashMap<(TagCategory, String), usize>,
}

impl TagIndex {
    pub fn build(tags: &[Tag]) -> Result<Self, CatalogError> {
        let mut keys: HashMap<(TagCategory, String), usize> = HashMap::new();

        for (position, tag) in tags.iter().enumerate() {
            let simplified = normalize_key(first_phrase(tag.value));
            let full = normalize_key(tag.value);
            for key in [simplified, full] {
                if key.is_empty() {
                    continue;
                }
                match keys.get(&(tag.category, key.clone())) {
                    Some(existing) if *existing != position => {
                        return Err(CatalogError::DuplicateKey {
                            category: tag.category,
                            key,
                            existing: tags[*existing].label.to_string(),
                            duplicate: tag.label.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        keys.insert((tag.category, key), position);
                    }
                }
            }
        }

        debug!(
            "Built tag index with {} tags and {} keys",
            tags.len(),
            keys.len()
        );

        Ok(TagIndex {
            tags: tags.to_vec(),
            keys,
        })
    }

    pub fn lookup(&self, value: &str, category: TagCategory) -> Option<&Tag> {
        let key = normalize_key(value);
        if key.is_empty() {
            return None;
        }
        self.keys
            .get(&(category, key))
            .and_then(|position| self.tags.get(*position))
    }

    pub fn tags_in(&self, category: TagCategory) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(move |tag| tag.category == category)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }
}
