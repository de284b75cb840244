use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{
    Config, ANALYSIS_SYSTEM_PROMPT, OPTIMIZATION_SYSTEM_PROMPT, TRANSLATION_SYSTEM_PROMPT,
};
use crate::llm::openrouter::OpenRouterClient;
use crate::prompt::{
    parse_optimized_prompt, separate_core_prompt_and_tags, CoreTagSplit, ParsedPromptResult,
};
use crate::tags::{SceneTagSet, TagIndex};
use crate::utils::cache::TtlCache;
use crate::utils::http::{truncate_for_log, RemoteError};
use crate::utils::language::resolve_prompt_language;

const MAX_PROMPT_CHARS: usize = 4000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub clarity: u8,
    pub specificity: u8,
    pub creativity: u8,
    pub technical: u8,
    pub overall: u8,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub missing_elements: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    #[serde(default)]
    clarity: f64,
    #[serde(default)]
    specificity: f64,
    #[serde(default)]
    creativity: f64,
    #[serde(default)]
    technical: f64,
    #[serde(default)]
    overall: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default, alias = "missing_elements")]
    missing_elements: Vec<String>,
}

fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

impl From<RawAnalysis> for AnalysisResult {
    fn from(raw: RawAnalysis) -> Self {
        AnalysisResult {
            clarity: clamp_score(raw.clarity),
            specificity: clamp_score(raw.specificity),
            creativity: clamp_score(raw.creativity),
            technical: clamp_score(raw.technical),
            overall: clamp_score(raw.overall),
            strengths: raw.strengths,
            weaknesses: raw.weaknesses,
            suggestions: raw.suggestions,
            missing_elements: raw.missing_elements,
        }
    }
}

fn default_language() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationOptions {
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub focus: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_analysis: Option<AnalysisResult>,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            style: String::new(),
            focus: String::new(),
            language: default_language(),
            previous_analysis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    pub prompt: String,
    pub target_model: String,
    #[serde(default)]
    pub options: OptimizationOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub optimized_prompt: String,
    pub improvements: Vec<String>,
    pub confidence: u8,
    pub reasoning: String,
    pub suggested_tags: SceneTagSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptimization {
    #[serde(default, alias = "optimized_prompt")]
    optimized_prompt: String,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "suggested_tags")]
    suggested_tags: SceneTagSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTerm {
    pub english: String,
    pub chinese: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub chinese_translation: String,
    pub explanation: String,
    pub key_terms: Vec<KeyTerm>,
    pub confidence: u8,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranslation {
    #[serde(default, alias = "chinese_translation")]
    chinese_translation: String,
    #[serde(default)]
    explanation: String,
    #[serde(default, alias = "key_terms")]
    key_terms: Vec<KeyTerm>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOptimization {
    pub optimization: OptimizationResult,
    pub parsed: ParsedPromptResult,
    pub split: CoreTagSplit,
}

pub fn parse_json_object_from_text<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&trimmed[start..=end]).ok()
}

fn validate_prompt(prompt: &str, what: &str) -> Result<String, RemoteError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(RemoteError::Validation(format!("{what} must not be empty")));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(RemoteError::Validation(format!(
            "{what} is longer than {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(prompt.to_string())
}

fn build_optimization_message(request: &OptimizationRequest) -> String {
    let options = &request.options;
    let mut lines = vec![
        format!("Prompt:\n{}", request.prompt.trim()),
        format!("Target model: {}", request.target_model.trim()),
    ];
    if !options.style.trim().is_empty() {
        lines.push(format!("Preferred style: {}", options.style.trim()));
    }
    if !options.focus.trim().is_empty() {
        lines.push(format!("Focus on: {}", options.focus.trim()));
    }
    lines.push(format!(
        "The user writes in {}; the optimized prompt must be in English.",
        options.language
    ));
    if let Some(analysis) = &options.previous_analysis {
        let analysis_json = serde_json::to_string(analysis).unwrap_or_default();
        lines.push(format!("Previous analysis:\n{analysis_json}"));
    }
    lines.join("\n\n")
}

fn merge_suggested_tags(parsed: &mut SceneTagSet, suggested: &SceneTagSet) {
    fn fill(slot: &mut Option<String>, suggestion: &Option<String>) {
        if slot.is_none() {
            if let Some(value) = suggestion.as_deref().map(str::trim) {
                if !value.is_empty() {
                    *slot = Some(value.to_string());
                }
            }
        }
    }

    fill(&mut parsed.art_style, &suggested.art_style);
    fill(&mut parsed.theme_style, &suggested.theme_style);
    fill(&mut parsed.mood, &suggested.mood);
}

pub struct PromptAssistant {
    client: OpenRouterClient,
    index: Arc<TagIndex>,
    analysis_cache: TtlCache<String, AnalysisResult>,
    optimization_cache: TtlCache<String, OptimizationResult>,
    translation_cache: TtlCache<String, TranslationResult>,
}

impl PromptAssistant {
    pub fn new(client: OpenRouterClient, index: Arc<TagIndex>, cache_ttl: Duration) -> Self {
        Self {
            client,
            index,
            analysis_cache: TtlCache::new(cache_ttl),
            optimization_cache: TtlCache::new(cache_ttl),
            translation_cache: TtlCache::new(cache_ttl),
        }
    }

    pub fn from_config(config: &Config, index: Arc<TagIndex>) -> Self {
        Self::new(
            OpenRouterClient::from_config(config),
            index,
            Duration::from_secs(config.assistant_cache_ttl_seconds),
        )
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_content: &str,
        operation: &str,
    ) -> Result<T, RemoteError> {
        let content = self
            .client
            .chat_completion(system_prompt, user_content, operation)
            .await?;
        parse_json_object_from_text::<T>(&content).ok_or_else(|| {
            warn!(
                "Could not parse {} response as JSON: {}",
                operation,
                truncate_for_log(&content, 500)
            );
            RemoteError::InvalidResponse(format!("{operation} response is not a JSON object"))
        })
    }

    pub async fn analyze_prompt(&self, prompt: &str) -> Result<AnalysisResult, RemoteError> {
        let prompt = validate_prompt(prompt, "prompt")?;
        if let Some(cached) = self.analysis_cache.get(&prompt) {
            debug!("Analysis cache hit");
            return Ok(cached);
        }

        let raw: RawAnalysis = self
            .request_json(ANALYSIS_SYSTEM_PROMPT, &prompt, "analyze")
            .await?;
        let result = AnalysisResult::from(raw);
        info!("Prompt analyzed: overall={}", result.overall);
        self.analysis_cache.insert(prompt, result.clone());
        Ok(result)
    }

    pub async fn optimize_prompt(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationResult, RemoteError> {
        let prompt = validate_prompt(&request.prompt, "prompt")?;
        let mut request = request.clone();
        request.prompt = prompt;
        if request.target_model.trim().is_empty() {
            request.target_model = self.client.model().to_string();
        }
        request.options.language = resolve_prompt_language(&request.options.language, &request.prompt);

        let cache_key = serde_json::to_string(&request)
            .map_err(|err| RemoteError::Validation(format!("unserializable request: {err}")))?;
        if let Some(cached) = self.optimization_cache.get(&cache_key) {
            debug!("Optimization cache hit");
            return Ok(cached);
        }

        let raw: RawOptimization = self
            .request_json(
                OPTIMIZATION_SYSTEM_PROMPT,
                &build_optimization_message(&request),
                "optimize",
            )
            .await?;
        if raw.optimized_prompt.trim().is_empty() {
            return Err(RemoteError::InvalidResponse(
                "optimization returned an empty prompt".to_string(),
            ));
        }
        let result = OptimizationResult {
            optimized_prompt: raw.optimized_prompt.trim().to_string(),
            improvements: raw.improvements,
            confidence: clamp_score(raw.confidence),
            reasoning: raw.reasoning,
            suggested_tags: raw.suggested_tags,
        };
        info!(
            "Prompt optimized: language={} confidence={}",
            request.options.language, result.confidence
        );
        self.optimization_cache.insert(cache_key, result.clone());
        Ok(result)
    }

    pub async fn translate_prompt(&self, english_prompt: &str) -> Result<TranslationResult, RemoteError> {
        let prompt = validate_prompt(english_prompt, "english prompt")?;
        if let Some(cached) = self.translation_cache.get(&prompt) {
            debug!("Translation cache hit");
            return Ok(cached);
        }

        let raw: RawTranslation = self
            .request_json(TRANSLATION_SYSTEM_PROMPT, &prompt, "translate")
            .await?;
        let result = TranslationResult {
            chinese_translation: raw.chinese_translation.trim().to_string(),
            explanation: raw.explanation,
            key_terms: raw.key_terms,
            confidence: clamp_score(raw.confidence),
        };
        self.translation_cache.insert(prompt, result.clone());
        Ok(result)
    }

    pub async fn optimize_and_parse(
        &self,
        request: &OptimizationRequest,
    ) -> Result<ParsedOptimization, RemoteError> {
        let optimization = self.optimize_prompt(request).await?;
        Ok(self.interpret_optimization(optimization))
    }

    pub fn interpret_optimization(&self, optimization: OptimizationResult) -> ParsedOptimization {
        let mut parsed = parse_optimized_prompt(&optimization.optimized_prompt, &self.index);
        merge_suggested_tags(&mut parsed.tags, &optimization.suggested_tags);
        let split = separate_core_prompt_and_tags(&optimization.optimized_prompt);
        ParsedOptimization {
            optimization,
            parsed,
            split,
        }
    }

    pub fn clear_caches(&self) {
        self.analysis_cache.clear();
        self.optimization_cache.clear();
        self.translation_cache.clear();
    }
}
