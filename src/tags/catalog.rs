use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    ArtStyle,
    ThemeStyle,
    Mood,
    Technical,
    Composition,
    Enhancement,
    SubjectSuggestion,
}

impl TagCategory {
    pub const ALL: [TagCategory; 7] = [
        TagCategory::ArtStyle,
        TagCategory::ThemeStyle,
        TagCategory::Mood,
        TagCategory::Technical,
        TagCategory::Composition,
        TagCategory::Enhancement,
        TagCategory::SubjectSuggestion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TagCategory::ArtStyle => "art_style",
            TagCategory::ThemeStyle => "theme_style",
            TagCategory::Mood => "mood",
            TagCategory::Technical => "technical",
            TagCategory::Composition => "composition",
            TagCategory::Enhancement => "enhancement",
            TagCategory::SubjectSuggestion => "subject_suggestion",
        }
    }

    pub fn field_name(self) -> &'static str {
        match self {
            TagCategory::ArtStyle => "artStyle",
            TagCategory::ThemeStyle => "themeStyle",
            TagCategory::Mood => "mood",
            TagCategory::Technical => "technical",
            TagCategory::Composition => "composition",
            TagCategory::Enhancement => "enhancement",
            TagCategory::SubjectSuggestion => "subjectSuggestion",
        }
    }

    pub fn from_key(value: &str) -> Option<Self> {
        let normalized = value.trim();
        TagCategory::ALL.into_iter().find(|category| {
            category.as_str().eq_ignore_ascii_case(normalized)
                || category.field_name().eq_ignore_ascii_case(normalized)
        })
    }
}

impl fmt::Display for TagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub category: TagCategory,
    pub label: &'static str,
    pub value: &'static str,
    pub display_value: Option<&'static str>,
}

impl Tag {
    pub fn simplified_value(&self) -> &'static str {
        first_phrase(self.value)
    }
}

pub fn first_phrase(value: &str) -> &str {
    value.split(',').next().unwrap_or(value).trim()
}

const fn tag(
    category: TagCategory,
    label: &'static str,
    value: &'static str,
    display_value: Option<&'static str>,
) -> Tag {
    Tag {
        category,
        label,
        value,
        display_value,
    }
}

use TagCategory::*;

pub static TAG_CATALOG: &[Tag] = &[
    // art_style
    tag(ArtStyle, "Photorealistic", "photorealistic, hyperrealistic, professional photography, 8K ultra-detailed", Some("Looks like a real photograph")),
    tag(ArtStyle, "Cinematic", "cinematic photography, film photography, dramatic lighting, cinematic composition", Some("Film still look")),
    tag(ArtStyle, "Oil Painting", "oil painting, classical art, visible brushstrokes, Renaissance style", None),
    tag(ArtStyle, "Watercolor", "watercolor painting, soft brushes, flowing colors, paper texture", None),
    tag(ArtStyle, "Anime", "anime style, manga style, cel shading, vibrant anime art", Some("Japanese animation look")),
    tag(ArtStyle, "Digital Art", "digital art, digital painting, concept art, detailed illustration", None),
    tag(ArtStyle, "Pencil Sketch", "pencil sketch, black and white, hand drawn, artistic sketch", None),
    tag(ArtStyle, "3D Render", "3D render, octane render, unreal engine, ray tracing", Some("Computer generated 3D")),
    tag(ArtStyle, "Pixel Art", "pixel art, 8-bit style, retro gaming, pixelated", None),
    tag(ArtStyle, "Minimalist", "minimalist design, clean lines, simple composition, modern aesthetic", None),
    tag(ArtStyle, "Cartoon", "cartoon style, animated, colorful, playful illustration", None),
    // theme_style
    tag(ThemeStyle, "Cyberpunk", "cyberpunk, neon lights, futuristic city, dystopian atmosphere", Some("Neon-lit high tech, low life")),
    tag(ThemeStyle, "Fantasy", "fantasy, magical, mythical creatures, enchanted forest", None),
    tag(ThemeStyle, "Sci-Fi", "sci-fi, futuristic, space technology, advanced civilization", None),
    tag(ThemeStyle, "Steampunk", "steampunk, vintage machinery, brass gears, Victorian era", None),
    tag(ThemeStyle, "Traditional Chinese", "traditional Chinese style, ancient Chinese architecture, ink wash painting, oriental aesthetics", Some("Classical Chinese aesthetics")),
    tag(ThemeStyle, "Modern Urban", "modern, contemporary, urban, sleek design", None),
    tag(ThemeStyle, "Retro", "retro vintage, nostalgic, classic style, aged effect", None),
    tag(ThemeStyle, "Nature", "natural scenery, mountains and rivers, lush vegetation, serene environment", None),
    tag(ThemeStyle, "Industrial", "industrial style, metallic texture, mechanical, urban decay", None),
    tag(ThemeStyle, "Gothic", "gothic style, dark architecture, mysterious atmosphere, medieval", None),
    // mood
    tag(Mood, "Warm", "warm lighting, bright, cheerful, golden tones", Some("Bright and cheerful")),
    tag(Mood, "Dark", "dark, mysterious, moody lighting, deep shadows", None),
    tag(Mood, "Dreamy", "dreamy, ethereal, soft glow, magical atmosphere", None),
    tag(Mood, "Epic", "epic, dramatic, grand scale, powerful", None),
    tag(Mood, "Peaceful", "peaceful, calm, serene, tranquil", None),
    tag(Mood, "Energetic", "energetic, dynamic, vibrant, lively", None),
    tag(Mood, "Melancholic", "melancholic, contemplative, somber, blue tones", None),
    tag(Mood, "Luxurious", "luxurious, elegant, premium, sophisticated", None),
    tag(Mood, "Mysterious", "mysterious fog, enigmatic, hidden details, suspenseful", None),
    // technical
    tag(Technical, "85mm Portrait Lens", "85mm lens, portrait lens, shallow depth of field", Some("Classic portrait focal length")),
    tag(Technical, "50mm Standard Lens", "50mm lens, standard lens, natural perspective", None),
    tag(Technical, "24mm Wide Angle", "24mm wide-angle, wide-angle lens, expansive view", None),
    tag(Technical, "Macro", "macro photography, extreme close-up, fine details", None),
    tag(Technical, "Long Exposure", "long exposure, motion blur, light trails", None),
    tag(Technical, "Shallow Depth of Field", "shallow depth of field, bokeh, background blur", None),
    tag(Technical, "Golden Hour", "golden hour lighting, warm sunlight, long soft shadows", None),
    tag(Technical, "Studio Lighting", "studio lighting, professional lighting, even illumination", None),
    tag(Technical, "Backlit", "backlit, rim lighting, silhouette", None),
    tag(Technical, "HDR", "HDR, high dynamic range, rich tonal range", None),
    tag(Technical, "Film Grain", "35mm film, film grain, analog photography", None),
    // composition
    tag(Composition, "Centered", "centered composition, symmetrical, balanced", None),
    tag(Composition, "Rule of Thirds", "rule of thirds, dynamic composition, visual balance", None),
    tag(Composition, "Close-up", "close-up shot, detailed facial features, intimate framing", None),
    tag(Composition, "Medium Shot", "medium shot, waist up, balanced framing", None),
    tag(Composition, "Wide Shot", "wide shot, establishing shot, full scene", None),
    tag(Composition, "Low Angle", "low angle shot, looking up, heroic perspective", None),
    tag(Composition, "High Angle", "high angle shot, looking down, overview perspective", None),
    tag(Composition, "Bird's Eye View", "bird's eye view, aerial perspective, top-down view", None),
    tag(Composition, "Leading Lines", "leading lines, depth perspective, guided composition", None),
    // enhancement
    tag(Enhancement, "Highly Detailed", "highly detailed, intricate details, ultra-detailed textures", None),
    tag(Enhancement, "Film Look", "cinematic color grading, film still, movie atmosphere", None),
    tag(Enhancement, "Award Winning", "award-winning, professional quality, portfolio piece", None),
    tag(Enhancement, "Volumetric Light", "volumetric lighting, god rays, atmospheric haze", None),
    tag(Enhancement, "Vivid Colors", "vivid colors, saturated, vibrant palette", None),
    tag(Enhancement, "Sharp Focus", "sharp focus, crisp details, clear definition", None),
    tag(Enhancement, "Artistic", "artistic interpretation, creative, expressive", None),
    // subject_suggestion
    tag(SubjectSuggestion, "Portrait", "portrait of a person, human subject, character focus", None),
    tag(SubjectSuggestion, "Landscape", "landscape, scenic view, natural environment", None),
    tag(SubjectSuggestion, "Animal", "animal, wildlife, creature portrait", None),
    tag(SubjectSuggestion, "Architecture", "architecture, building, structural design", None),
    tag(SubjectSuggestion, "Still Life", "still life, arranged objects, tabletop scene", None),
    tag(SubjectSuggestion, "Vehicle", "vehicle, car, transportation design", None),
];

pub fn catalog() -> &'static [Tag] {
    TAG_CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_entries() {
        for category in TagCategory::ALL {
            assert!(
                catalog().iter().any(|tag| tag.category == category),
                "no tags for {category}"
            );
        }
    }

    #[test]
    fn category_keys_round_trip() {
        for category in TagCategory::ALL {
            assert_eq!(TagCategory::from_key(category.as_str()), Some(category));
            assert_eq!(TagCategory::from_key(category.field_name()), Some(category));
        }
        assert_eq!(TagCategory::from_key("lighting"), None);
    }

    #[test]
    fn simplified_value_is_first_phrase() {
        let tag = catalog()
            .iter()
            .find(|tag| tag.label == "85mm Portrait Lens")
            .unwrap();
        assert_eq!(tag.simplified_value(), "85mm lens");
        assert_eq!(first_phrase("  single  "), "single");
    }
}
