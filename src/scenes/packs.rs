use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::tags::SceneTagSet;

const FALLBACK_STEPS: u32 = 28;

const MODEL_DEFAULT_STEPS: &[(&str, u32)] = &[
    ("black-forest-labs/flux-schnell", 4),
    ("black-forest-labs/flux-dev", 28),
    ("black-forest-labs/flux-1.1-pro", 25),
    ("black-forest-labs/flux-pro", 25),
    ("stability-ai/sdxl", 30),
    ("stability-ai/stable-diffusion-3", 28),
];

pub fn default_steps_for_model(model: &str) -> u32 {
    let model = model.trim();
    MODEL_DEFAULT_STEPS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(model))
        .map(|(_, steps)| *steps)
        .unwrap_or(FALLBACK_STEPS)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub recommended_model: String,
    pub aspect_ratio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default)]
    pub tags: SceneTagSet,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
    #[serde(default)]
    pub popularity: u32,
}

impl ScenePack {
    pub fn effective_steps(&self) -> u32 {
        self.steps
            .unwrap_or_else(|| default_steps_for_model(&self.recommended_model))
    }

    fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [&self.name, &self.description, &self.category]
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
            || self
                .examples
                .iter()
                .any(|example| example.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStat {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
struct ScenePacksFile {
    #[serde(default)]
    packs: Vec<ScenePack>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn single(value: &str) -> Option<String> {
    Some(value.to_string())
}

pub fn builtin_packs() -> Vec<ScenePack> {
    vec![
        ScenePack {
            id: "portrait-photography".to_string(),
            name: "Portrait Photography".to_string(),
            description: "Natural light portraits with a soft, blurred background".to_string(),
            category: "portrait".to_string(),
            difficulty: Difficulty::Beginner,
            recommended_model: "black-forest-labs/flux-dev".to_string(),
            aspect_ratio: "3:4".to_string(),
            steps: None,
            tags: SceneTagSet {
                art_style: single("photorealistic"),
                theme_style: None,
                mood: single("warm lighting"),
                technical: strings(&["85mm lens", "golden hour lighting"]),
                composition: strings(&["close-up shot"]),
                enhancement: strings(&["highly detailed", "sharp focus"]),
            },
            examples: strings(&[
                "a young woman with freckles smiling by a window",
                "an elderly fisherman with weathered skin looking into the distance",
            ]),
            tips: strings(&[
                "Describe the expression and the light source",
                "Keep the background simple",
            ]),
            popularity: 95,
        },
        ScenePack {
            id: "cyberpunk-city".to_string(),
            name: "Cyberpunk City".to_string(),
            description: "Rain-soaked neon streets in a dense future metropolis".to_string(),
            category: "sci-fi".to_string(),
            difficulty: Difficulty::Intermediate,
            recommended_model: "black-forest-labs/flux-dev".to_string(),
            aspect_ratio: "16:9".to_string(),
            steps: Some(30),
            tags: SceneTagSet {
                art_style: single("cinematic photography"),
                theme_style: single("cyberpunk"),
                mood: single("dark"),
                technical: strings(&["long exposure"]),
                composition: strings(&["low angle shot", "leading lines"]),
                enhancement: strings(&["volumetric lighting", "cinematic color grading"]),
            },
            examples: strings(&[
                "a lone courier on a motorbike weaving through a crowded night market",
                "towering holographic billboards above a flooded street",
            ]),
            tips: strings(&["Mention reflections on wet surfaces"]),
            popularity: 88,
        },
        ScenePack {
            id: "anime-character".to_string(),
            name: "Anime Character".to_string(),
            description: "Clean cel-shaded character art".to_string(),
            category: "illustration".to_string(),
            difficulty: Difficulty::Beginner,
            recommended_model: "black-forest-labs/flux-schnell".to_string(),
            aspect_ratio: "2:3".to_string(),
            steps: None,
            tags: SceneTagSet {
                art_style: single("anime style"),
                theme_style: single("fantasy"),
                mood: single("energetic"),
                technical: Vec::new(),
                composition: strings(&["medium shot"]),
                enhancement: strings(&["vivid colors"]),
            },
            examples: strings(&["a girl with silver hair holding a glowing sword"]),
            tips: strings(&["Describe hair, outfit and pose", "Name one signature prop"]),
            popularity: 91,
        },
        ScenePack {
            id: "epic-landscape".to_string(),
            name: "Epic Landscape".to_string(),
            description: "Grand natural vistas at the best time of day".to_string(),
            category: "landscape".to_string(),
            difficulty: Difficulty::Beginner,
            recommended_model: "black-forest-labs/flux-1.1-pro".to_string(),
            aspect_ratio: "16:9".to_string(),
            steps: None,
            tags: SceneTagSet {
                art_style: single("photorealistic"),
                theme_style: single("natural scenery"),
                mood: single("epic"),
                technical: strings(&["24mm wide-angle", "HDR"]),
                composition: strings(&["wide shot", "rule of thirds"]),
                enhancement: strings(&["award-winning"]),
            },
            examples: strings(&[
                "snow-capped peaks above a turquoise glacial lake at sunrise",
                "a winding canyon river under a sky full of stars",
            ]),
            tips: strings(&["Name the time of day and the weather"]),
            popularity: 84,
        },
        ScenePack {
            id: "product-showcase".to_string(),
            name: "Product Showcase".to_string(),
            description: "Studio product shots for catalogues and ads".to_string(),
            category: "commercial".to_string(),
            difficulty: Difficulty::Intermediate,
            recommended_model: "black-forest-labs/flux-dev".to_string(),
            aspect_ratio: "1:1".to_string(),
            steps: Some(32),
            tags: SceneTagSet {
                art_style: single("3D render"),
                theme_style: single("modern"),
                mood: single("luxurious"),
                technical: strings(&["studio lighting", "macro photography"]),
                composition: strings(&["centered composition"]),
                enhancement: strings(&["sharp focus"]),
            },
            examples: strings(&["a perfume bottle on a marble pedestal with soft reflections"]),
            tips: strings(&["Describe the material and the surface it rests on"]),
            popularity: 72,
        },
        ScenePack {
            id: "ink-wash-art".to_string(),
            name: "Ink Wash Art".to_string(),
            description: "Traditional Chinese ink painting with generous empty space".to_string(),
            category: "traditional".to_string(),
            difficulty: Difficulty::Advanced,
            recommended_model: "stability-ai/sdxl".to_string(),
            aspect_ratio: "9:16".to_string(),
            steps: None,
            tags: SceneTagSet {
                art_style: single("watercolor painting"),
                theme_style: single("traditional Chinese style"),
                mood: single("peaceful"),
                technical: Vec::new(),
                composition: strings(&["leading lines"]),
                enhancement: strings(&["artistic interpretation"]),
            },
            examples: strings(&["misty mountains with a small boat drifting on the river"]),
            tips: strings(&["Leave large areas of the canvas empty"]),
            popularity: 66,
        },
    ]
}

fn read_packs_file(path: &Path) -> Result<ScenePacksFile> {
    let raw = fs::read_to_string(path).map_err(|err| {
        anyhow!("Failed to read scene packs file '{}': {}", path.display(), err)
    })?;
    serde_yaml::from_str(&raw).map_err(|err| {
        anyhow!("Failed to parse scene packs file '{}': {}", path.display(), err)
    })
}

#[derive(Debug, Clone)]
pub struct ScenePackLibrary {
    packs: Vec<ScenePack>,
}

impl ScenePackLibrary {
    pub fn new(packs: Vec<ScenePack>) -> Self {
        Self { packs }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_packs())
    }

    pub fn load(path: &Path) -> Self {
        let mut packs = builtin_packs();
        if !path.exists() {
            debug!("No scene packs file at {}", path.display());
            return Self::new(packs);
        }

        let file = match read_packs_file(path) {
            Ok(file) => file,
            Err(err) => {
                warn!("{err}; using built-in scene packs only");
                return Self::new(packs);
            }
        };

        let mut seen = packs
            .iter()
            .map(|pack| pack.id.clone())
            .collect::<HashSet<_>>();
        let mut added = 0usize;
        for mut pack in file.packs {
            let id = pack.id.trim().to_string();
            if id.is_empty() {
                warn!("Skipping scene pack without id in {}", path.display());
                continue;
            }
            if !seen.insert(id.clone()) {
                warn!("Skipping duplicate scene pack id '{}'", id);
                continue;
            }
            pack.id = id;
            packs.push(pack);
            added += 1;
        }

        info!(
            "Loaded {} scene pack(s) from {} ({} total)",
            added,
            path.display(),
            packs.len()
        );
        Self::new(packs)
    }

    pub fn packs(&self) -> &[ScenePack] {
        &self.packs
    }

    pub fn find_pack(&self, id: &str) -> Option<&ScenePack> {
        let id = id.trim();
        self.packs.iter().find(|pack| pack.id == id)
    }

    pub fn search_packs(&self, query: &str) -> Vec<ScenePack> {
        self.packs
            .iter()
            .filter(|pack| pack.matches_query(query))
            .cloned()
            .collect()
    }

    pub fn popular_packs(&self, limit: usize) -> Vec<ScenePack> {
        let mut packs = self.packs.clone();
        packs.sort_by(|a, b| b.popularity.cmp(&a.popularity).then_with(|| a.name.cmp(&b.name)));
        packs.truncate(limit);
        packs
    }

    pub fn packs_by_category(&self, category: &str) -> Vec<ScenePack> {
        let category = category.trim();
        self.packs
            .iter()
            .filter(|pack| pack.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    pub fn pack_category_stats(&self) -> Vec<CategoryStat> {
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for pack in &self.packs {
            *counts.entry(pack.category.as_str()).or_default() += 1;
        }
        let mut stats = counts
            .into_iter()
            .map(|(category, count)| CategoryStat {
                category: category.to_string(),
                count,
            })
            .collect::<Vec<_>>();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{catalog, TagIndex, TagMappingService};
    use std::sync::Arc;

    #[test]
    fn builtin_pack_tags_all_resolve() {
        let service = TagMappingService::new(Arc::new(TagIndex::build(catalog()).unwrap()));
        for pack in builtin_packs() {
            assert!(
                service.validate_tag_set(&pack.tags).is_empty(),
                "pack {} has unresolved tags",
                pack.id
            );
        }
    }

    #[test]
    fn steps_fall_back_to_model_table() {
        assert_eq!(default_steps_for_model("black-forest-labs/flux-schnell"), 4);
        assert_eq!(default_steps_for_model("someone/unknown-model"), 28);
        let library = ScenePackLibrary::builtin();
        assert_eq!(library.find_pack("anime-character").unwrap().effective_steps(), 4);
        assert_eq!(library.find_pack("cyberpunk-city").unwrap().effective_steps(), 30);
    }

    #[test]
    fn browse_helpers_filter_and_sort() {
        let library = ScenePackLibrary::builtin();
        let popular = library.popular_packs(2);
        assert_eq!(
            popular.iter().map(|pack| pack.id.as_str()).collect::<Vec<_>>(),
            vec!["portrait-photography", "anime-character"]
        );
        assert_eq!(library.search_packs("NEON").len(), 1);
        assert_eq!(library.packs_by_category("Landscape").len(), 1);

        let stats = library.pack_category_stats();
        assert_eq!(stats.iter().map(|stat| stat.count).sum::<i64>(), 6);
    }

    #[test]
    fn yaml_packs_merge_without_duplicates() {
        let path = std::env::temp_dir().join(format!(
            "image_prompt_studio_packs_{}.yaml",
            std::process::id()
        ));
        let yaml = r#"
packs:
  - id: portrait-photography
    name: Shadowed duplicate
    recommendedModel: black-forest-labs/flux-dev
    aspectRatio: "1:1"
  - id: " macro-insects "
    name: Macro Insects
    category: nature
    difficulty: advanced
    recommendedModel: black-forest-labs/flux-dev
    aspectRatio: "4:3"
    tags:
      technical: ["macro photography"]
    examples: ["a dragonfly covered in dew"]
"#;
        fs::write(&path, yaml).unwrap();
        let library = ScenePackLibrary::load(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(library.packs().len(), 7);
        assert_eq!(
            library.find_pack("portrait-photography").unwrap().name,
            "Portrait Photography"
        );
        let added = library.find_pack("macro-insects").unwrap();
        assert_eq!(added.id, "macro-insects");
        assert_eq!(added.difficulty, Difficulty::Advanced);
        assert_eq!(added.tags.technical, vec!["macro photography".to_string()]);
    }

    #[test]
    fn missing_packs_file_uses_builtins() {
        let library = ScenePackLibrary::load(Path::new("/nonexistent/scene_packs.yaml"));
        assert_eq!(library.packs().len(), builtin_packs().len());
    }

    #[test]
    fn malformed_packs_file_uses_builtins() {
        let path = std::env::temp_dir().join(format!(
            "image_prompt_studio_bad_packs_{}.yaml",
            std::process::id()
        ));
        fs::write(&path, "packs:\n  - id: x\n    name: [unclosed\n").unwrap();
        let library = ScenePackLibrary::load(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(library.packs().len(), builtin_packs().len());
        assert!(library.find_pack("x").is_none());
        assert!(read_packs_file(Path::new("/nonexistent/scene_packs.yaml")).is_err());
    }
}
