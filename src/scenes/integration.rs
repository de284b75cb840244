use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::database::Database;
use crate::db::models::{RatingSummary, UsageEvent};
use crate::scenes::packs::{default_steps_for_model, CategoryStat, ScenePack, ScenePackLibrary};
use crate::scenes::template::{SceneTemplate, TemplateApplier, TemplatesFile};
use crate::tags::{join_prompt_parts, ExpandedTag, TagExpansionResult, TagMappingService};
use crate::utils::cache::TtlCache;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("template store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum SceneItem {
    Pack(ScenePack),
    Template(SceneTemplate),
}

impl SceneItem {
    // `suggested_tags` marks a template; `tags` with `examples` marks a scene pack.
    pub fn from_json(value: JsonValue) -> Result<Self, SceneError> {
        let Some(object) = value.as_object() else {
            return Err(SceneError::Validation(
                "scene item must be a JSON object".to_string(),
            ));
        };

        if object.contains_key("suggested_tags") || object.contains_key("suggestedTags") {
            let template = serde_json::from_value::<SceneTemplate>(value)
                .map_err(|err| SceneError::Validation(format!("invalid template: {err}")))?;
            return Ok(SceneItem::Template(template));
        }
        if object.contains_key("tags") && object.contains_key("examples") {
            let pack = serde_json::from_value::<ScenePack>(value)
                .map_err(|err| SceneError::Validation(format!("invalid scene pack: {err}")))?;
            return Ok(SceneItem::Pack(pack));
        }

        Err(SceneError::Validation(
            "scene item is neither a scene pack nor a template".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ScenePack,
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSource {
    pub kind: SourceKind,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    pub num_inference_steps: u32,
    pub output_format: String,
    pub num_outputs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResult {
    pub base_prompt: String,
    pub full_prompt: String,
    pub suggested_tags: JsonValue,
    pub expanded_tags: Vec<ExpandedTag>,
    pub config: GenerationConfig,
    pub warnings: Vec<String>,
    pub source: ApplicationSource,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub custom_text: Option<String>,
    pub variables: HashMap<String, String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationDefaults {
    pub model: String,
    pub aspect_ratio: String,
    pub output_format: String,
    pub num_outputs: u32,
}

impl GenerationDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model.clone(),
            aspect_ratio: config.default_aspect_ratio.clone(),
            output_format: config.default_output_format.clone(),
            num_outputs: config.default_num_outputs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "items", rename_all = "snake_case")]
pub enum BrowseItems {
    Templates(Vec<SceneTemplate>),
    ScenePacks(Vec<ScenePack>),
}

pub struct SceneIntegrationService {
    mapping: TagMappingService,
    packs: Arc<ScenePackLibrary>,
    applier: Arc<dyn TemplateApplier>,
    store: Option<Database>,
    template_cache: TtlCache<String, SceneTemplate>,
    defaults: GenerationDefaults,
}

impl SceneIntegrationService {
    pub fn new(
        mapping: TagMappingService,
        packs: Arc<ScenePackLibrary>,
        applier: Arc<dyn TemplateApplier>,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            mapping,
            packs,
            applier,
            store: None,
            template_cache: TtlCache::new(Duration::ZERO),
            defaults,
        }
    }

    pub fn with_store(mut self, store: Database, cache_ttl: Duration) -> Self {
        self.store = Some(store);
        self.template_cache = TtlCache::new(cache_ttl);
        self
    }

    pub fn packs(&self) -> &ScenePackLibrary {
        &self.packs
    }

    pub fn apply_item(&self, item: &SceneItem, options: &ApplyOptions) -> ApplicationResult {
        match item {
            SceneItem::Pack(pack) => self.apply_scene_pack(pack, options.custom_text.as_deref()),
            SceneItem::Template(template) => self.apply_template(template, options),
        }
    }

    pub fn apply_scene_pack(&self, pack: &ScenePack, custom_text: Option<&str>) -> ApplicationResult {
        let base_prompt = pack.examples.first().cloned().unwrap_or_default();
        let expansion = self.mapping.expand_tag_set(&pack.tags);
        let source = ApplicationSource {
            kind: SourceKind::ScenePack,
            id: pack.id.clone(),
            name: pack.name.clone(),
        };
        let model = non_empty_or(&pack.recommended_model, &self.defaults.model);
        let aspect_ratio = non_empty_or(&pack.aspect_ratio, &self.defaults.aspect_ratio);
        let steps = pack.steps.unwrap_or_else(|| default_steps_for_model(&model));
        let suggested_tags = serde_json::to_value(&pack.tags).unwrap_or_default();

        self.assemble(
            base_prompt,
            expansion,
            custom_text,
            suggested_tags,
            source,
            model,
            aspect_ratio,
            steps,
        )
    }

    pub fn apply_template(&self, template: &SceneTemplate, options: &ApplyOptions) -> ApplicationResult {
        let base_prompt = self.applier.base_prompt(template, &options.variables);
        let expansion = self.mapping.expand_database_tag_set(&template.suggested_tags);
        let source = ApplicationSource {
            kind: SourceKind::Template,
            id: template.id.clone(),
            name: template.name.clone(),
        };
        let model = non_empty_or(
            template.recommended_model.as_deref().unwrap_or(""),
            &self.defaults.model,
        );
        let aspect_ratio = non_empty_or(
            template.aspect_ratio.as_deref().unwrap_or(""),
            &self.defaults.aspect_ratio,
        );
        let steps = template
            .steps
            .unwrap_or_else(|| default_steps_for_model(&model));
        let suggested_tags = serde_json::to_value(&template.suggested_tags).unwrap_or_default();

        let result = self.assemble(
            base_prompt,
            expansion,
            options.custom_text.as_deref(),
            suggested_tags,
            source,
            model,
            aspect_ratio,
            steps,
        );

        let event = UsageEvent {
            template_id: template.id.clone(),
            user_id: options.user_id.clone(),
            action: "apply".to_string(),
            prompt: result.full_prompt.clone(),
            used_at: result.applied_at,
        };
        if let Err(err) = self.applier.record_usage(event) {
            warn!("Failed to record usage of template {}: {}", template.id, err);
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        base_prompt: String,
        expansion: TagExpansionResult,
        custom_text: Option<&str>,
        suggested_tags: JsonValue,
        source: ApplicationSource,
        model: String,
        aspect_ratio: String,
        steps: u32,
    ) -> ApplicationResult {
        let full_prompt =
            join_prompt_parts(&[&base_prompt, &expansion.prompt, custom_text.unwrap_or("")]);
        let config = GenerationConfig {
            prompt: full_prompt.clone(),
            model,
            aspect_ratio,
            num_inference_steps: steps,
            output_format: self.defaults.output_format.clone(),
            num_outputs: self.defaults.num_outputs,
            source: Some(source.clone()),
        };
        debug!(
            "Applied {:?} {} with {} expanded tag(s)",
            source.kind,
            source.id,
            expansion.expanded_tags.len()
        );

        ApplicationResult {
            base_prompt,
            full_prompt,
            suggested_tags,
            expanded_tags: expansion.expanded_tags,
            config,
            warnings: expansion.warnings,
            source,
            applied_at: Utc::now(),
        }
    }

    pub fn apply_pack_by_id(&self, id: &str, custom_text: Option<&str>) -> Result<ApplicationResult, SceneError> {
        let pack = self
            .packs
            .find_pack(id)
            .ok_or_else(|| SceneError::NotFound(format!("scene pack '{}'", id.trim())))?;
        Ok(self.apply_scene_pack(pack, custom_text))
    }

    pub async fn apply_template_by_id(
        &self,
        id: &str,
        options: &ApplyOptions,
    ) -> Result<ApplicationResult, SceneError> {
        let template = self.load_template(id).await?;
        Ok(self.apply_template(&template, options))
    }

    fn store(&self) -> Result<&Database, SceneError> {
        self.store
            .as_ref()
            .ok_or_else(|| SceneError::Store(anyhow::anyhow!("template store is not configured")))
    }

    pub async fn load_template(&self, id: &str) -> Result<SceneTemplate, SceneError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SceneError::Validation("template id is required".to_string()));
        }
        if let Some(template) = self.template_cache.get(&id.to_string()) {
            debug!("Template cache hit for {}", id);
            return Ok(template);
        }

        let template = self
            .store()?
            .get_template(id)
            .await?
            .ok_or_else(|| SceneError::NotFound(format!("template '{id}'")))?;
        self.template_cache.insert(id.to_string(), template.clone());
        Ok(template)
    }

    pub async fn search(&self, query: &str, limit: usize) -> BrowseItems {
        if let Some(store) = &self.store {
            match store.search_templates(query, limit as i64).await {
                Ok(templates) => return BrowseItems::Templates(templates),
                Err(err) => warn!("Template search failed, using scene packs: {}", err),
            }
        }
        let mut packs = self.packs.search_packs(query);
        packs.truncate(limit);
        BrowseItems::ScenePacks(packs)
    }

    pub async fn popular(&self, limit: usize) -> BrowseItems {
        if let Some(store) = &self.store {
            match store.popular_templates(limit as i64).await {
                Ok(templates) => return BrowseItems::Templates(templates),
                Err(err) => warn!("Popular templates query failed, using scene packs: {}", err),
            }
        }
        BrowseItems::ScenePacks(self.packs.popular_packs(limit))
    }

    pub async fn by_category(&self, category: &str) -> BrowseItems {
        if let Some(store) = &self.store {
            match store.templates_by_category(category.trim()).await {
                Ok(templates) => return BrowseItems::Templates(templates),
                Err(err) => warn!("Category query failed, using scene packs: {}", err),
            }
        }
        BrowseItems::ScenePacks(self.packs.packs_by_category(category))
    }

    pub async fn category_stats(&self) -> Vec<CategoryStat> {
        if let Some(store) = &self.store {
            match store.template_category_counts().await {
                Ok(rows) => {
                    return rows
                        .into_iter()
                        .map(|row| CategoryStat {
                            category: row.category,
                            count: row.count,
                        })
                        .collect();
                }
                Err(err) => warn!("Category stats query failed, using scene packs: {}", err),
            }
        }
        self.packs.pack_category_stats()
    }

    pub async fn rate_template(
        &self,
        id: &str,
        rating: i64,
        user_id: Option<&str>,
    ) -> Result<RatingSummary, SceneError> {
        if !(1..=5).contains(&rating) {
            return Err(SceneError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        let template = self.load_template(id).await?;
        let summary = self
            .store()?
            .record_rating(&template.id, user_id, rating)
            .await?;
        self.template_cache.invalidate(&template.id);
        info!(
            "Template {} rated {} (avg {:.2} over {})",
            template.id, rating, summary.rating_avg, summary.rating_count
        );
        Ok(summary)
    }

    pub async fn import_templates(&self, path: &Path) -> Result<usize, SceneError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| SceneError::Validation(format!("cannot read {}: {err}", path.display())))?;
        let file: TemplatesFile = serde_yaml::from_str(&raw)
            .map_err(|err| SceneError::Validation(format!("cannot parse {}: {err}", path.display())))?;

        for template in &file.templates {
            if template.id.trim().is_empty() || template.name.trim().is_empty() {
                return Err(SceneError::Validation(
                    "every template needs an id and a name".to_string(),
                ));
            }
        }

        let store = self.store()?;
        for template in &file.templates {
            store.upsert_template(template).await?;
            self.template_cache.invalidate(&template.id);
        }
        info!("Imported {} template(s) from {}", file.templates.len(), path.display());
        Ok(file.templates.len())
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::tests::{sample_template, temp_database_url};
    use crate::tags::{catalog, TagIndex};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingApplier {
        events: Mutex<Vec<UsageEvent>>,
        fail: bool,
    }

    impl TemplateApplier for RecordingApplier {
        fn record_usage(&self, event: UsageEvent) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow::anyhow!("usage queue closed"));
            }
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn defaults() -> GenerationDefaults {
        GenerationDefaults {
            model: "black-forest-labs/flux-schnell".to_string(),
            aspect_ratio: "1:1".to_string(),
            output_format: "webp".to_string(),
            num_outputs: 1,
        }
    }

    fn service_with(applier: Arc<RecordingApplier>) -> SceneIntegrationService {
        let mapping = TagMappingService::new(Arc::new(TagIndex::build(catalog()).unwrap()));
        SceneIntegrationService::new(
            mapping,
            Arc::new(ScenePackLibrary::builtin()),
            applier,
            defaults(),
        )
    }

    fn service() -> SceneIntegrationService {
        service_with(Arc::new(RecordingApplier::default()))
    }

    #[test]
    fn scene_pack_application_is_deterministic() {
        let service = service();
        let pack = service.packs().find_pack("cyberpunk-city").unwrap().clone();
        let first = service.apply_scene_pack(&pack, Some("rain"));
        let second = service.apply_scene_pack(&pack, Some("rain"));
        assert_eq!(first.full_prompt, second.full_prompt);
        assert_eq!(first.config, second.config);
        assert_eq!(first.expanded_tags, second.expanded_tags);
    }

    #[test]
    fn scene_pack_prompt_starts_with_first_example() {
        let service = service();
        let result = service.apply_pack_by_id("portrait-photography", None).unwrap();
        assert_eq!(result.base_prompt, "a young woman with freckles smiling by a window");
        assert!(result.full_prompt.starts_with("a young woman with freckles smiling by a window, photorealistic, hyperrealistic"));
        assert!(result.full_prompt.contains("85mm lens, portrait lens, shallow depth of field"));
        assert!(result.warnings.is_empty());
        assert_eq!(result.config.model, "black-forest-labs/flux-dev");
        assert_eq!(result.config.num_inference_steps, 28);
        assert_eq!(result.config.output_format, "webp");
        assert_eq!(result.source.kind, SourceKind::ScenePack);
        assert_eq!(result.suggested_tags["artStyle"], "photorealistic");
    }

    #[test]
    fn pack_without_examples_has_empty_base_prompt() {
        let service = service();
        let mut pack = service.packs().find_pack("ink-wash-art").unwrap().clone();
        pack.examples.clear();
        let result = service.apply_scene_pack(&pack, None);
        assert!(result.base_prompt.is_empty());
        assert!(result.full_prompt.starts_with("watercolor painting"));
    }

    #[test]
    fn unknown_pack_id_is_not_found() {
        assert!(matches!(
            service().apply_pack_by_id("nope", None),
            Err(SceneError::NotFound(_))
        ));
    }

    #[test]
    fn template_application_renders_and_records_usage() {
        let applier = Arc::new(RecordingApplier::default());
        let service = service_with(applier.clone());
        let mut template = sample_template("lake", "landscape", 0);
        template.suggested_tags.insert("moood".to_string(), vec!["odd".to_string()]);
        let mut options = ApplyOptions {
            user_id: Some("user-7".to_string()),
            ..ApplyOptions::default()
        };
        options.variables.insert("subject".to_string(), "heron".to_string());

        let result = service.apply_template(&template, &options);
        assert_eq!(result.base_prompt, "a heron beside a mountain lake");
        assert_eq!(
            result.full_prompt,
            "a heron beside a mountain lake, peaceful, calm, serene, tranquil, odd"
        );
        assert_eq!(result.warnings, vec!["unknown tag category: moood".to_string()]);
        assert_eq!(result.config.num_inference_steps, 30);
        assert_eq!(result.config.aspect_ratio, "16:9");

        let events = applier.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].template_id, "lake");
        assert_eq!(events[0].user_id.as_deref(), Some("user-7"));
        assert_eq!(events[0].prompt, result.full_prompt);
    }

    #[test]
    fn usage_recording_failure_does_not_fail_application() {
        let applier = Arc::new(RecordingApplier {
            fail: true,
            ..RecordingApplier::default()
        });
        let service = service_with(applier);
        let mut template = sample_template("t", "portrait", 0);
        template.recommended_model = None;
        template.steps = None;
        let result = service.apply_template(&template, &ApplyOptions::default());
        assert_eq!(result.config.model, "black-forest-labs/flux-schnell");
        assert_eq!(result.config.num_inference_steps, 4);
    }

    #[test]
    fn raw_items_are_discriminated_structurally() {
        let template = SceneItem::from_json(serde_json::json!({
            "id": "t1",
            "name": "Harbor",
            "base_prompt": "a harbor",
            "suggested_tags": {"mood": ["peaceful"]}
        }))
        .unwrap();
        assert!(matches!(template, SceneItem::Template(ref t) if t.base_prompt == "a harbor"));

        let pack = SceneItem::from_json(serde_json::json!({
            "id": "p1",
            "name": "Pack",
            "recommendedModel": "black-forest-labs/flux-dev",
            "aspectRatio": "1:1",
            "tags": {"artStyle": "pixel art"},
            "examples": ["a castle"]
        }))
        .unwrap();
        let result = service().apply_item(&pack, &ApplyOptions::default());
        assert_eq!(result.full_prompt, "a castle, pixel art, 8-bit style, retro gaming, pixelated");

        assert!(matches!(
            SceneItem::from_json(serde_json::json!({"id": "x", "tags": {}})),
            Err(SceneError::Validation(_))
        ));
        assert!(SceneItem::from_json(serde_json::json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn rating_is_validated_before_touching_store() {
        let service = service();
        for rating in [0, 6, -1] {
            assert!(matches!(
                service.rate_template("t1", rating, None).await,
                Err(SceneError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn browse_without_store_uses_scene_packs() {
        let service = service();
        let popular = service.popular(3).await;
        assert!(matches!(popular, BrowseItems::ScenePacks(ref packs) if packs.len() == 3));
        let stats = service.category_stats().await;
        assert!(!stats.is_empty());
    }

    #[tokio::test]
    async fn browse_falls_back_when_store_fails() {
        let (url, path) = temp_database_url("fallback");
        let db = Database::init(&url).await.unwrap();
        db.upsert_template(&sample_template("lake", "landscape", 3)).await.unwrap();
        let service = service().with_store(db.clone(), Duration::from_secs(60));

        assert!(matches!(service.search("mountain", 10).await, BrowseItems::Templates(ref t) if t.len() == 1));
        let loaded = service.load_template("lake").await.unwrap();
        assert_eq!(loaded.name, "Template lake");

        db.close().await;
        assert!(matches!(service.search("neon", 10).await, BrowseItems::ScenePacks(ref p) if p.len() == 1));
        assert!(matches!(service.by_category("landscape").await, BrowseItems::ScenePacks(_)));
        assert_eq!(service.category_stats().await.iter().map(|s| s.count).sum::<i64>(), 6);
        // cached copy survives the closed pool
        assert!(service.load_template("lake").await.is_ok());
        assert!(matches!(service.load_template("other").await, Err(SceneError::Store(_))));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn import_and_rate_templates() {
        let (url, db_path) = temp_database_url("import");
        let db = Database::init(&url).await.unwrap();
        let service = service().with_store(db.clone(), Duration::from_secs(60));

        let file_path = std::env::temp_dir().join(format!(
            "image_prompt_studio_templates_{}.yaml",
            std::process::id()
        ));
        let yaml = r#"
templates:
  - id: night-market
    name: Night Market
    category: street
    basePrompt: "a busy {city} night market"
    suggestedTags:
      theme_style: ["cyberpunk"]
"#;
        std::fs::write(&file_path, yaml).unwrap();
        assert_eq!(service.import_templates(&file_path).await.unwrap(), 1);
        let _ = std::fs::remove_file(&file_path);

        let summary = service.rate_template("night-market", 4, Some("u1")).await.unwrap();
        assert_eq!(summary.rating_count, 1);
        assert!((summary.rating_avg - 4.0).abs() < 1e-9);
        assert!(matches!(
            service.rate_template("missing", 4, None).await,
            Err(SceneError::NotFound(_))
        ));

        db.close().await;
        let _ = std::fs::remove_file(db_path);
    }
}
