use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub database_url: String,
    pub http_timeout_seconds: u64,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub assistant_model: String,
    pub assistant_temperature: f32,
    pub assistant_cache_ttl_seconds: u64,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub replicate_poll_interval_ms: u64,
    pub replicate_max_poll_attempts: u32,
    pub replicate_max_retries: u32,
    pub default_model: String,
    pub default_aspect_ratio: String,
    pub default_output_format: String,
    pub default_num_outputs: u32,
    pub storage_upload_endpoint: String,
    pub storage_public_base_url: String,
    pub scene_packs_config_path: PathBuf,
    pub template_cache_ttl_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn normalize_output_format(value: String) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "webp" | "png" => lowered,
        "jpg" | "jpeg" => "jpg".to_string(),
        _ => {
            warn!(
                "Unknown DEFAULT_OUTPUT_FORMAT value '{}'; defaulting to webp.",
                value
            );
            "webp".to_string()
        }
    }
}

fn normalize_aspect_ratio(value: String) -> String {
    let trimmed = value.trim();
    let valid = trimmed
        .split_once(':')
        .map(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok())
        .unwrap_or(false);
    if valid {
        trimmed.to_string()
    } else {
        warn!(
            "Invalid DEFAULT_ASPECT_RATIO value '{}'; defaulting to 1:1.",
            value
        );
        "1:1".to_string()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let verbose_http = env_bool("LOG_HTTP", false);
        let log_level = if verbose_http {
            "debug".to_string()
        } else {
            env_string("LOG_LEVEL", "info").to_lowercase()
        };

        Ok(Config {
            log_level,
            log_dir: PathBuf::from(env_string("LOG_DIR", "logs")),
            database_url: env_string("DATABASE_URL", "sqlite://studio.db?mode=rwc"),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 60).max(1),
            openrouter_api_key: env_string("OPENROUTER_API_KEY", ""),
            openrouter_base_url: env_string("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            assistant_model: env_string("PROMPT_ASSISTANT_MODEL", "openai/gpt-4o-mini"),
            assistant_temperature: env_f32("PROMPT_ASSISTANT_TEMPERATURE", 0.4),
            assistant_cache_ttl_seconds: env_u64("ASSISTANT_CACHE_TTL_SECONDS", 1800),
            replicate_api_token: env_string("REPLICATE_API_TOKEN", ""),
            replicate_base_url: env_string("REPLICATE_BASE_URL", "https://api.replicate.com/v1"),
            replicate_poll_interval_ms: env_u64("REPLICATE_POLL_INTERVAL_MS", 1500),
            replicate_max_poll_attempts: env_u32("REPLICATE_MAX_POLL_ATTEMPTS", 60).max(1),
            replicate_max_retries: env_u32("REPLICATE_MAX_RETRIES", 3).max(1),
            default_model: env_string("DEFAULT_MODEL", "black-forest-labs/flux-schnell"),
            default_aspect_ratio: normalize_aspect_ratio(env_string("DEFAULT_ASPECT_RATIO", "1:1")),
            default_output_format: normalize_output_format(env_string(
                "DEFAULT_OUTPUT_FORMAT",
                "webp",
            )),
            default_num_outputs: env_u32("DEFAULT_NUM_OUTPUTS", 1).clamp(1, 4),
            storage_upload_endpoint: env_string("STORAGE_UPLOAD_ENDPOINT", ""),
            storage_public_base_url: env_string("STORAGE_PUBLIC_BASE_URL", ""),
            scene_packs_config_path: PathBuf::from(env_string(
                "SCENE_PACKS_CONFIG_PATH",
                "scene_packs.yaml",
            )),
            template_cache_ttl_seconds: env_u64("TEMPLATE_CACHE_TTL_SECONDS", 300),
        })
    }
}

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert prompt engineer for text-to-image models such as FLUX and Stable Diffusion. Evaluate the user's image prompt.\n\nScore each dimension from 0 to 100:\n- clarity: how unambiguous the description is\n- specificity: how concrete the subject, setting and details are\n- creativity: how original and evocative the idea is\n- technical: how well it uses photographic/artistic technical vocabulary\n- overall: your overall judgement\n\nAlso list strengths, weaknesses, concrete suggestions and missing elements (for example lighting, composition, style, mood).\n\nReturn ONLY a JSON object with the keys: clarity, specificity, creativity, technical, overall, strengths, weaknesses, suggestions, missingElements.";

pub const OPTIMIZATION_SYSTEM_PROMPT: &str = "You are an expert prompt engineer for text-to-image models. Rewrite the user's prompt into an optimized English prompt for the target model.\n\nRules:\n1. Keep the user's core subject and intent.\n2. Write the result as comma-separated descriptive phrases, most important first.\n3. Add style, mood, lighting, composition and quality descriptors where they help.\n4. Respect the requested style and focus.\n5. If a previous analysis is provided, fix the weaknesses it lists.\n\nReturn ONLY a JSON object with the keys: optimizedPrompt (string), improvements (array of strings), confidence (0-100), reasoning (string), suggestedTags (object with optional artStyle, themeStyle, mood strings and optional technical, composition, enhancement string arrays).";

pub const TRANSLATION_SYSTEM_PROMPT: &str = "You translate English text-to-image prompts into natural Simplified Chinese so that users can understand them.\n\nReturn ONLY a JSON object with the keys: chineseTranslation (string), explanation (string, in Chinese, describing what the prompt will produce), keyTerms (array of objects with english and chinese), confidence (0-100).";
