use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompt::similarity::similarity;
use crate::tags::{SceneTagSet, Tag, TagCategory, TagIndex};

pub const QUALITY_KEYWORDS: &[&str] = &[
    "high quality",
    "best quality",
    "top quality",
    "ultra high quality",
    "masterpiece",
];

const STYLE_THRESHOLD: f64 = 0.5;
const TECHNICAL_THRESHOLD: f64 = 0.4;
const COMPOSITION_THRESHOLD: f64 = 0.4;
// Enhancement phrases are generic; a stricter bar keeps them from swallowing
// ordinary descriptive text.
const ENHANCEMENT_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMatch {
    pub segment: String,
    pub category: TagCategory,
    pub tag_value: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPromptResult {
    pub core_prompt: String,
    pub include_quality: bool,
    pub tags: SceneTagSet,
    pub matches: Vec<SegmentMatch>,
}

fn is_quality_segment(segment: &str) -> bool {
    let lowered = segment.to_lowercase();
    QUALITY_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn best_match<'a>(
    segment: &str,
    candidates: impl Iterator<Item = &'a Tag>,
    threshold: f64,
) -> Option<(&'a Tag, f64)> {
    let mut best: Option<(&'a Tag, f64)> = None;
    for tag in candidates {
        let score = similarity(segment, tag.value);
        if score < threshold {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((tag, score)),
        }
    }
    best
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing.eq_ignore_ascii_case(value)) {
        values.push(value.to_string());
    }
}

fn classify_segment(
    segment: &str,
    index: &TagIndex,
    tags: &SceneTagSet,
) -> Option<(TagCategory, &'static str, f64)> {
    let single_slots = [
        (TagCategory::ArtStyle, tags.art_style.is_none()),
        (TagCategory::ThemeStyle, tags.theme_style.is_none()),
        (TagCategory::Mood, tags.mood.is_none()),
    ];
    for (category, open) in single_slots {
        if !open {
            continue;
        }
        if let Some((tag, score)) = best_match(segment, index.tags_in(category), STYLE_THRESHOLD) {
            return Some((category, tag.simplified_value(), score));
        }
    }

    let multi_slots = [
        (TagCategory::Technical, TECHNICAL_THRESHOLD),
        (TagCategory::Composition, COMPOSITION_THRESHOLD),
        (TagCategory::Enhancement, ENHANCEMENT_THRESHOLD),
    ];
    for (category, threshold) in multi_slots {
        if let Some((tag, score)) = best_match(segment, index.tags_in(category), threshold) {
            return Some((category, tag.simplified_value(), score));
        }
    }

    None
}

pub fn parse_optimized_prompt(text: &str, index: &TagIndex) -> ParsedPromptResult {
    let mut result = ParsedPromptResult::default();
    let mut unmatched = Vec::new();

    for segment in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if is_quality_segment(segment) {
            result.include_quality = true;
            continue;
        }

        let Some((category, value, score)) = classify_segment(segment, index, &result.tags) else {
            unmatched.push(segment.to_string());
            continue;
        };

        match category {
            TagCategory::ArtStyle => result.tags.art_style = Some(value.to_string()),
            TagCategory::ThemeStyle => result.tags.theme_style = Some(value.to_string()),
            TagCategory::Mood => result.tags.mood = Some(value.to_string()),
            TagCategory::Technical => push_unique(&mut result.tags.technical, value),
            TagCategory::Composition => push_unique(&mut result.tags.composition, value),
            TagCategory::Enhancement => push_unique(&mut result.tags.enhancement, value),
            TagCategory::SubjectSuggestion => {}
        }
        result.matches.push(SegmentMatch {
            segment: segment.to_string(),
            category,
            tag_value: value.to_string(),
            score,
        });
    }

    result.core_prompt = unmatched.join(", ");
    debug!(
        "Parsed optimized prompt: {} matched segment(s), {} unmatched, quality={}",
        result.matches.len(),
        unmatched.len(),
        result.include_quality
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::catalog;

    fn index() -> TagIndex {
        TagIndex::build(catalog()).unwrap()
    }

    #[test]
    fn splits_prompt_into_buckets() {
        let parsed = parse_optimized_prompt(
            "a red fox in the snow, photorealistic, 85mm lens, rule of thirds, masterpiece, highly detailed",
            &index(),
        );
        assert_eq!(parsed.core_prompt, "a red fox in the snow");
        assert!(parsed.include_quality);
        assert_eq!(parsed.tags.art_style.as_deref(), Some("photorealistic"));
        assert_eq!(parsed.tags.technical, vec!["85mm lens".to_string()]);
        assert_eq!(parsed.tags.composition, vec!["rule of thirds".to_string()]);
        assert_eq!(parsed.tags.enhancement, vec!["highly detailed".to_string()]);
        assert_eq!(parsed.matches.len(), 4);
    }

    #[test]
    fn single_valued_slot_keeps_first_match() {
        let parsed = parse_optimized_prompt("anime style, pixel art, a knight", &index());
        assert_eq!(parsed.tags.art_style.as_deref(), Some("anime style"));
        assert!(parsed.core_prompt.contains("pixel art"));
        assert!(parsed.core_prompt.ends_with("a knight"));
    }

    #[test]
    fn repeated_technical_segments_are_deduplicated() {
        let parsed = parse_optimized_prompt("85mm lens, 85mm lens", &index());
        assert_eq!(parsed.tags.technical.len(), 1);
        assert_eq!(parsed.matches.len(), 2);
    }

    #[test]
    fn quality_keywords_are_consumed() {
        let parsed = parse_optimized_prompt("Best Quality, masterpiece", &index());
        assert!(parsed.include_quality);
        assert!(parsed.core_prompt.is_empty());
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_result() {
        assert_eq!(
            parse_optimized_prompt(" , ,", &index()),
            ParsedPromptResult::default()
        );
    }
}
