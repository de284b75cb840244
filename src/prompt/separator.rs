use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::language::contains_cjk;

const TAG_KEYWORDS: &[&str] = &[
    "8k",
    "4k",
    "hdr",
    "uhd",
    "high quality",
    "best quality",
    "masterpiece",
    "highly detailed",
    "ultra detailed",
    "ultra-detailed",
    "sharp focus",
    "bokeh",
    "depth of field",
    "cinematic lighting",
    "studio lighting",
    "volumetric lighting",
    "golden hour",
    "octane render",
    "unreal engine",
    "ray tracing",
    "wide angle",
    "wide-angle",
    "close-up",
    "rule of thirds",
    "professional photography",
    "award winning",
    "award-winning",
    "trending on artstation",
    "photorealistic",
    "hyperrealistic",
    "film grain",
];

static SHORT_TECH_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\b\d+\s?mm\b|\bf/\d+(\.\d+)?\b|\b\d+k\b|\b\d{3,4}p\b|\b\d+\s?x\s?\d+\b|\biso\s?\d+\b|\b\d+\s?fps\b)")
        .expect("valid technical token regex")
});

const SHORT_SEGMENT_MAX_CHARS: usize = 20;
const POSITIONAL_CORE_SEGMENTS: usize = 3;
const TRAILING_TAG_MAX_WORDS: usize = 3;
const MIN_CORE_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreTagSplit {
    pub core_prompt: String,
    pub tags: Vec<String>,
    pub used_fallback: bool,
}

fn is_keyword_tag(segment: &str) -> bool {
    let lowered = segment.to_lowercase();
    TAG_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

fn is_short_technical_token(segment: &str) -> bool {
    segment.chars().count() <= SHORT_SEGMENT_MAX_CHARS && SHORT_TECH_TOKEN_RE.is_match(segment)
}

fn is_core_segment(position: usize, segment: &str) -> bool {
    if contains_cjk(segment) {
        return true;
    }
    if is_keyword_tag(segment) || is_short_technical_token(segment) {
        return false;
    }
    if position < POSITIONAL_CORE_SEGMENTS {
        return true;
    }
    segment.split_whitespace().count() > TRAILING_TAG_MAX_WORDS
}

// Keeps the prompt unsplit when extraction would leave under 30% of it as description.
pub fn separate_core_prompt_and_tags(prompt: &str) -> CoreTagSplit {
    let original = prompt.trim();
    if original.is_empty() {
        return CoreTagSplit::default();
    }

    let mut core = Vec::new();
    let mut tags = Vec::new();
    for (position, segment) in original
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .enumerate()
    {
        if is_core_segment(position, segment) {
            core.push(segment.to_string());
        } else {
            tags.push(segment.to_string());
        }
    }

    let core_prompt = core.join(", ");
    let core_len = core_prompt.chars().count() as f64;
    let original_len = original.chars().count() as f64;
    if core_len < original_len * MIN_CORE_RATIO {
        debug!(
            "Core prompt too short after tag extraction ({} of {} chars); keeping original",
            core_len, original_len
        );
        return CoreTagSplit {
            core_prompt: original.to_string(),
            tags: Vec::new(),
            used_fallback: true,
        };
    }

    CoreTagSplit {
        core_prompt,
        tags,
        used_fallback: false,
    }
}
