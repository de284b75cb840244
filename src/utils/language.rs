use once_cell::sync::Lazy;
use regex::Regex;
use whatlang::{detect, Script};

const MIN_ALPHA_CHARS: usize = 2;
const LATIN_CONFIDENCE_THRESHOLD: f64 = 0.68;
const NON_LATIN_CONFIDENCE_THRESHOLD: f64 = 0.5;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid url regex"));
static WEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[(\[{<]+|[)\]}>]+|:\d+(\.\d+)?").expect("valid weight regex"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static CJK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]").expect("valid cjk regex")
});

fn normalize_text_for_detection(text: &str) -> String {
    let without_urls = URL_RE.replace_all(text, " ");
    let without_weights = WEIGHT_RE.replace_all(&without_urls, " ");
    WHITESPACE_RE
        .replace_all(&without_weights, " ")
        .trim()
        .to_string()
}

fn alphabetic_char_count(text: &str) -> usize {
    text.chars().filter(|ch| ch.is_alphabetic()).count()
}

pub fn contains_cjk(text: &str) -> bool {
    CJK_RE.is_match(text)
}

pub fn detect_language_name(text: &str) -> Option<String> {
    let normalized = normalize_text_for_detection(text);
    if normalized.is_empty() || alphabetic_char_count(&normalized) < MIN_ALPHA_CHARS {
        return None;
    }

    let info = detect(&normalized)?;
    if info.is_reliable() {
        return Some(info.lang().eng_name().to_string());
    }

    let threshold = match info.script() {
        Script::Latin => LATIN_CONFIDENCE_THRESHOLD,
        _ => NON_LATIN_CONFIDENCE_THRESHOLD,
    };
    if info.confidence() >= threshold {
        return Some(info.lang().eng_name().to_string());
    }

    None
}

pub fn resolve_prompt_language(requested: &str, prompt: &str) -> String {
    let requested = requested.trim();
    if !requested.is_empty() && !requested.eq_ignore_ascii_case("auto") {
        return requested.to_string();
    }

    if let Some(language) = detect_language_name(prompt) {
        return language;
    }
    if contains_cjk(prompt) {
        return "Mandarin".to_string();
    }
    "English".to_string()
}
