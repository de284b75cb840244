use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::config::Config;
use crate::imaging::{
    load_image_source, CropRect, FilterParams, ImageProcessor, OutputFormat, ProcessOptions,
    ProcessedImage, ResizeMode,
};
use crate::llm::assistant::{OptimizationOptions, OptimizationRequest};
use crate::llm::replicate::GenerationRequest;
use crate::prompt::{parse_optimized_prompt, separate_core_prompt_and_tags};
use crate::scenes::ApplyOptions;
use crate::state::AppState;
use crate::tags::mapping::{DatabaseTagSet, SceneTagSet};
use crate::tags::TagCategory;

const DEFAULT_BROWSE_LIMIT: usize = 12;
const DEFAULT_THUMBNAIL_SIZE: u32 = 256;
const DEFAULT_COMPRESS_ITERATIONS: u32 = 8;

pub fn usage() -> &'static str {
    "Usage: image_prompt_studio <command> [args]

Commands:
  expand <tags-json> [--database]
  expand --category <category> <value>
  tags <category>
  validate <tags-json>
  apply-pack <pack-id> [--custom <text>]
  apply-template <template-id> [--custom <text>] [--var <name=value>]... [--user <id>]
  search <query> [--limit <n>]
  popular [--limit <n>]
  category <name>
  category-stats
  rate-template <template-id> <1-5> [--user <id>]
  import-templates <file.yaml|file.json>
  parse-prompt <text>
  split-prompt <text>
  analyze <prompt>
  optimize <prompt> [--model <owner/name>] [--style <s>] [--focus <f>] [--language <auto|English|Chinese>] [--parse]
  translate <english-prompt>
  generate [<prompt>] [--pack <id>|--template <id>] [--custom <text>] [--var <name=value>]...
           [--model <owner/name>] [--aspect-ratio <w:h>] [--steps <n>] [--outputs <n>] [--format <webp|png|jpg>]
           [--seed <n>] [--width <px> --height <px>] [--upload <base-filename>]
  process-image <input>... --output <path|dir> [--width <px>] [--height <px>] [--mode <contain|cover|stretch|pad>]
           [--format <jpeg|png|webp>] [--quality <0-1>] [--brightness <%>] [--contrast <%>] [--saturation <%>]
           [--blur <px>] [--crop <x,y,w,h>]
  compress-image <input> --output <path> --target-kb <n> [--max-iterations <n>] [--format <jpeg|png|webp>]
  thumbnail <input> --output <path> [--size <px>]"
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Expand {
        tags_json: String,
        database: bool,
    },
    ExpandValue {
        category: TagCategory,
        value: String,
    },
    Tags {
        category: TagCategory,
    },
    Validate {
        tags_json: String,
    },
    ApplyPack {
        id: String,
        custom_text: Option<String>,
    },
    ApplyTemplate {
        id: String,
        custom_text: Option<String>,
        variables: HashMap<String, String>,
        user_id: Option<String>,
    },
    Search {
        query: String,
        limit: usize,
    },
    Popular {
        limit: usize,
    },
    Category {
        name: String,
    },
    CategoryStats,
    RateTemplate {
        id: String,
        rating: i64,
        user_id: Option<String>,
    },
    ImportTemplates {
        path: PathBuf,
    },
    ParsePrompt {
        text: String,
    },
    SplitPrompt {
        text: String,
    },
    Analyze {
        prompt: String,
    },
    Optimize {
        prompt: String,
        target_model: String,
        options: OptimizationOptions,
        parse: bool,
    },
    Translate {
        prompt: String,
    },
    Generate(GenerateArgs),
    ProcessImage {
        inputs: Vec<String>,
        output: PathBuf,
        options: ProcessOptions,
    },
    CompressImage {
        input: String,
        output: PathBuf,
        target_bytes: usize,
        max_iterations: u32,
        options: ProcessOptions,
    },
    Thumbnail {
        input: String,
        output: PathBuf,
        size: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateArgs {
    pub prompt: Option<String>,
    pub pack: Option<String>,
    pub template: Option<String>,
    pub custom_text: Option<String>,
    pub variables: HashMap<String, String>,
    pub model: Option<String>,
    pub aspect_ratio: Option<String>,
    pub steps: Option<u32>,
    pub num_outputs: Option<u32>,
    pub output_format: Option<String>,
    pub seed: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub upload_base_filename: Option<String>,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Expand { .. } | Command::ExpandValue { .. } => "expand",
            Command::Tags { .. } => "tags",
            Command::Validate { .. } => "validate",
            Command::ApplyPack { .. } => "apply-pack",
            Command::ApplyTemplate { .. } => "apply-template",
            Command::Search { .. } => "search",
            Command::Popular { .. } => "popular",
            Command::Category { .. } => "category",
            Command::CategoryStats => "category-stats",
            Command::RateTemplate { .. } => "rate-template",
            Command::ImportTemplates { .. } => "import-templates",
            Command::ParsePrompt { .. } => "parse-prompt",
            Command::SplitPrompt { .. } => "split-prompt",
            Command::Analyze { .. } => "analyze",
            Command::Optimize { .. } => "optimize",
            Command::Translate { .. } => "translate",
            Command::Generate(_) => "generate",
            Command::ProcessImage { .. } => "process-image",
            Command::CompressImage { .. } => "compress-image",
            Command::Thumbnail { .. } => "thumbnail",
        }
    }
}

#[derive(Debug, Default)]
struct ParsedArgs {
    positional: Vec<String>,
    values: HashMap<&'static str, Vec<String>>,
    switches: Vec<&'static str>,
}

impl ParsedArgs {
    fn value(&self, flag: &str) -> Option<&str> {
        self.values
            .get(flag)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    fn all(&self, flag: &str) -> &[String] {
        self.values.get(flag).map(Vec::as_slice).unwrap_or(&[])
    }

    fn switch(&self, flag: &str) -> bool {
        self.switches.iter().any(|switch| *switch == flag)
    }

    fn text(&self) -> Option<String> {
        let joined = self.positional.join(" ");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn required_text(&self, what: &str) -> Result<String> {
        self.text()
            .ok_or_else(|| anyhow!("{what} is required\n{}", usage()))
    }

    fn number<T: FromStr>(&self, flag: &str) -> Result<Option<T>> {
        self.value(flag)
            .map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|_| anyhow!("Invalid {flag} value: {value}"))
            })
            .transpose()
    }

    fn output(&self) -> Result<PathBuf> {
        self.value("--output")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("--output is required"))
    }

    fn variables(&self) -> Result<HashMap<String, String>> {
        let mut variables = HashMap::new();
        for raw in self.all("--var") {
            let (name, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid --var value: {raw} (expected name=value)"))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Invalid --var value: {raw} (empty name)");
            }
            variables.insert(name.to_string(), value.trim().to_string());
        }
        Ok(variables)
    }
}

fn collect_args(
    command: &str,
    args: &[String],
    value_flags: &[&'static str],
    switch_flags: &[&'static str],
) -> Result<ParsedArgs> {
    let mut parsed = ParsedArgs::default();
    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();
        if arg == "--help" || arg == "-h" {
            return Err(anyhow!(usage()));
        }
        if let Some(flag) = value_flags.iter().find(|flag| **flag == arg) {
            index += 1;
            let value = args
                .get(index)
                .ok_or_else(|| anyhow!("Missing value for {flag}"))?;
            parsed.values.entry(*flag).or_default().push(value.clone());
        } else if let Some(flag) = switch_flags.iter().find(|flag| **flag == arg) {
            parsed.switches.push(*flag);
        } else if arg.starts_with("--") {
            return Err(anyhow!("Unknown {command} argument: {arg}\n{}", usage()));
        } else {
            parsed.positional.push(arg.to_string());
        }
        index += 1;
    }
    Ok(parsed)
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_category(value: &str) -> Result<TagCategory> {
    TagCategory::from_key(value).ok_or_else(|| {
        let known = TagCategory::ALL
            .iter()
            .map(|category| category.as_str())
            .collect::<Vec<_>>();
        anyhow!("Unknown tag category: {value} (expected one of {})", known.join(", "))
    })
}

fn parse_crop(value: &str) -> Result<CropRect> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow!("Invalid --crop value: {value} (expected x,y,w,h)"))?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(CropRect {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
        _ => Err(anyhow!("Invalid --crop value: {value} (expected x,y,w,h)")),
    }
}

fn parse_process_options(parsed: &ParsedArgs) -> Result<ProcessOptions> {
    let mut options = ProcessOptions {
        width: parsed.number("--width")?,
        height: parsed.number("--height")?,
        ..ProcessOptions::default()
    };
    if let Some(mode) = parsed.value("--mode") {
        options.resize_mode = ResizeMode::from_str(mode)?;
    }
    if let Some(format) = parsed.value("--format") {
        options.format = OutputFormat::from_str(format)?;
    }
    if let Some(quality) = parsed.number::<f32>("--quality")? {
        options.quality = quality;
    }
    if let Some(crop) = parsed.value("--crop") {
        options.crop = Some(parse_crop(crop)?);
    }
    let defaults = FilterParams::default();
    options.filters = FilterParams {
        brightness: parsed.number("--brightness")?.unwrap_or(defaults.brightness),
        contrast: parsed.number("--contrast")?.unwrap_or(defaults.contrast),
        saturation: parsed.number("--saturation")?.unwrap_or(defaults.saturation),
        blur: parsed.number("--blur")?.unwrap_or(defaults.blur),
    };
    Ok(options)
}

pub fn parse_command(args: &[String]) -> Result<Command> {
    let Some(name) = args.get(1).map(String::as_str) else {
        return Err(anyhow!(usage()));
    };
    let rest = &args[2..];

    let command = match name {
        "expand" => {
            let parsed = collect_args(name, rest, &["--category"], &["--database"])?;
            match parsed.value("--category") {
                Some(category) => Command::ExpandValue {
                    category: parse_category(category)?,
                    value: parsed.required_text("tag value")?,
                },
                None => Command::Expand {
                    tags_json: parsed.required_text("tags JSON")?,
                    database: parsed.switch("--database"),
                },
            }
        }
        "tags" => Command::Tags {
            category: parse_category(
                &collect_args(name, rest, &[], &[])?.required_text("tag category")?,
            )?,
        },
        "validate" => Command::Validate {
            tags_json: collect_args(name, rest, &[], &[])?.required_text("tags JSON")?,
        },
        "apply-pack" => {
            let parsed = collect_args(name, rest, &["--custom"], &[])?;
            Command::ApplyPack {
                id: parsed.required_text("pack id")?,
                custom_text: optional(parsed.value("--custom")),
            }
        }
        "apply-template" => {
            let parsed = collect_args(name, rest, &["--custom", "--var", "--user"], &[])?;
            Command::ApplyTemplate {
                id: parsed.required_text("template id")?,
                custom_text: optional(parsed.value("--custom")),
                variables: parsed.variables()?,
                user_id: optional(parsed.value("--user")),
            }
        }
        "search" => {
            let parsed = collect_args(name, rest, &["--limit"], &[])?;
            Command::Search {
                query: parsed.required_text("search query")?,
                limit: parsed.number::<usize>("--limit")?.unwrap_or(DEFAULT_BROWSE_LIMIT).max(1),
            }
        }
        "popular" => {
            let parsed = collect_args(name, rest, &["--limit"], &[])?;
            Command::Popular {
                limit: parsed.number::<usize>("--limit")?.unwrap_or(DEFAULT_BROWSE_LIMIT).max(1),
            }
        }
        "category" => {
            let parsed = collect_args(name, rest, &[], &[])?;
            Command::Category {
                name: parsed.required_text("category name")?,
            }
        }
        "category-stats" => {
            collect_args(name, rest, &[], &[])?;
            Command::CategoryStats
        }
        "rate-template" => {
            let parsed = collect_args(name, rest, &["--user"], &[])?;
            let [id, rating] = parsed.positional.as_slice() else {
                return Err(anyhow!("rate-template expects <template-id> <rating>\n{}", usage()));
            };
            Command::RateTemplate {
                id: id.clone(),
                rating: rating
                    .parse::<i64>()
                    .map_err(|_| anyhow!("Invalid rating value: {rating}"))?,
                user_id: optional(parsed.value("--user")),
            }
        }
        "import-templates" => {
            let parsed = collect_args(name, rest, &[], &[])?;
            Command::ImportTemplates {
                path: PathBuf::from(parsed.required_text("templates file")?),
            }
        }
        "parse-prompt" => Command::ParsePrompt {
            text: collect_args(name, rest, &[], &[])?.required_text("prompt text")?,
        },
        "split-prompt" => Command::SplitPrompt {
            text: collect_args(name, rest, &[], &[])?.required_text("prompt text")?,
        },
        "analyze" => Command::Analyze {
            prompt: collect_args(name, rest, &[], &[])?.required_text("prompt")?,
        },
        "translate" => Command::Translate {
            prompt: collect_args(name, rest, &[], &[])?.required_text("prompt")?,
        },
        "optimize" => {
            let parsed = collect_args(
                name,
                rest,
                &["--model", "--style", "--focus", "--language"],
                &["--parse"],
            )?;
            let mut options = OptimizationOptions::default();
            if let Some(style) = optional(parsed.value("--style")) {
                options.style = style;
            }
            if let Some(focus) = optional(parsed.value("--focus")) {
                options.focus = focus;
            }
            if let Some(language) = optional(parsed.value("--language")) {
                options.language = language;
            }
            Command::Optimize {
                prompt: parsed.required_text("prompt")?,
                target_model: optional(parsed.value("--model")).unwrap_or_default(),
                options,
                parse: parsed.switch("--parse"),
            }
        }
        "generate" => {
            let parsed = collect_args(
                name,
                rest,
                &[
                    "--pack",
                    "--template",
                    "--custom",
                    "--var",
                    "--model",
                    "--aspect-ratio",
                    "--steps",
                    "--outputs",
                    "--format",
                    "--seed",
                    "--width",
                    "--height",
                    "--upload",
                ],
                &[],
            )?;
            let generate = GenerateArgs {
                prompt: parsed.text(),
                pack: optional(parsed.value("--pack")),
                template: optional(parsed.value("--template")),
                custom_text: optional(parsed.value("--custom")),
                variables: parsed.variables()?,
                model: optional(parsed.value("--model")),
                aspect_ratio: optional(parsed.value("--aspect-ratio")),
                steps: parsed.number("--steps")?,
                num_outputs: parsed.number("--outputs")?,
                output_format: optional(parsed.value("--format")),
                seed: parsed.number("--seed")?,
                width: parsed.number("--width")?,
                height: parsed.number("--height")?,
                upload_base_filename: optional(parsed.value("--upload")),
            };
            let sources = [
                generate.prompt.is_some(),
                generate.pack.is_some(),
                generate.template.is_some(),
            ];
            match sources.iter().filter(|present| **present).count() {
                0 => bail!("generate needs a prompt, --pack or --template\n{}", usage()),
                1 => {}
                _ => bail!("generate accepts only one of a prompt, --pack or --template"),
            }
            Command::Generate(generate)
        }
        "process-image" => {
            let parsed = collect_args(
                name,
                rest,
                &[
                    "--output",
                    "--width",
                    "--height",
                    "--mode",
                    "--format",
                    "--quality",
                    "--brightness",
                    "--contrast",
                    "--saturation",
                    "--blur",
                    "--crop",
                ],
                &[],
            )?;
            if parsed.positional.is_empty() {
                bail!("process-image needs at least one input\n{}", usage());
            }
            Command::ProcessImage {
                options: parse_process_options(&parsed)?,
                output: parsed.output()?,
                inputs: parsed.positional,
            }
        }
        "compress-image" => {
            let parsed = collect_args(
                name,
                rest,
                &["--output", "--target-kb", "--max-iterations", "--format"],
                &[],
            )?;
            let target_kb = parsed
                .number::<usize>("--target-kb")?
                .ok_or_else(|| anyhow!("--target-kb is required"))?;
            Command::CompressImage {
                input: parsed.required_text("input image")?,
                output: parsed.output()?,
                target_bytes: target_kb.saturating_mul(1024),
                max_iterations: parsed
                    .number("--max-iterations")?
                    .unwrap_or(DEFAULT_COMPRESS_ITERATIONS),
                options: parse_process_options(&parsed)?,
            }
        }
        "thumbnail" => {
            let parsed = collect_args(name, rest, &["--output", "--size"], &[])?;
            Command::Thumbnail {
                input: parsed.required_text("input image")?,
                output: parsed.output()?,
                size: parsed.number("--size")?.unwrap_or(DEFAULT_THUMBNAIL_SIZE),
            }
        }
        "--help" | "-h" | "help" => return Err(anyhow!(usage())),
        other => return Err(anyhow!("Unknown command: {other}\n{}", usage())),
    };
    Ok(command)
}

async fn build_generation_request(
    state: &AppState,
    config: &Config,
    args: &GenerateArgs,
) -> Result<(GenerationRequest, Vec<String>)> {
    let (mut request, warnings) = if let Some(pack) = &args.pack {
        let applied = state
            .scenes
            .apply_pack_by_id(pack, args.custom_text.as_deref())?;
        (GenerationRequest::from(&applied.config), applied.warnings)
    } else if let Some(template) = &args.template {
        let options = ApplyOptions {
            custom_text: args.custom_text.clone(),
            variables: args.variables.clone(),
            user_id: None,
        };
        let applied = state.scenes.apply_template_by_id(template, &options).await?;
        (GenerationRequest::from(&applied.config), applied.warnings)
    } else {
        let prompt = args.prompt.clone().unwrap_or_default();
        (GenerationRequest::from_config(&prompt, config), Vec::new())
    };

    if let Some(model) = &args.model {
        request.model = model.clone();
        if args.steps.is_none() && args.pack.is_none() && args.template.is_none() {
            request.num_inference_steps = crate::scenes::packs::default_steps_for_model(model);
        }
    }
    if let Some(aspect_ratio) = &args.aspect_ratio {
        request.aspect_ratio = aspect_ratio.clone();
    }
    if let Some(steps) = args.steps {
        request.num_inference_steps = steps;
    }
    if let Some(num_outputs) = args.num_outputs {
        request.num_outputs = num_outputs;
    }
    if let Some(output_format) = &args.output_format {
        request.output_format = output_format.clone();
    }
    request.seed = args.seed;
    request.width = args.width;
    request.height = args.height;
    Ok((request, warnings))
}

fn write_output(path: &Path, image: &ProcessedImage) -> Result<JsonValue> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(path, &image.bytes)
        .with_context(|| format!("cannot write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), image.bytes.len());
    Ok(json!({
        "output": path.display().to_string(),
        "metadata": image.metadata,
        "compressionRatio": image.compression_ratio,
    }))
}

fn batch_output_path(dir: &Path, input: &str, index: usize, format: OutputFormat) -> PathBuf {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("image-{}", index + 1));
    dir.join(format!("{stem}.{}", format.extension()))
}

async fn process_images(
    inputs: &[String],
    output: &Path,
    options: &ProcessOptions,
) -> Result<JsonValue> {
    let mut processor = ImageProcessor::new();
    if let [input] = inputs {
        let source = load_image_source(input).await?;
        let image = processor.process_image(&source.bytes, options)?;
        return write_output(output, &image);
    }

    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        sources.push(load_image_source(input).await?.bytes);
    }
    let mut results = Vec::with_capacity(inputs.len());
    for item in processor.batch_process(&sources, options) {
        let input = &inputs[item.index];
        match (&item.image, &item.error) {
            (Some(image), _) => {
                let path = batch_output_path(output, input, item.index, options.format);
                results.push(write_output(&path, image)?);
            }
            (None, error) => {
                warn!("Skipping {}: {}", input, error.clone().unwrap_or_default());
                results.push(json!({ "input": input, "error": error }));
            }
        }
    }
    Ok(json!({ "items": results }))
}

pub async fn run_command(state: &AppState, config: &Config, command: Command) -> Result<JsonValue> {
    let output = match command {
        Command::Expand {
            tags_json,
            database,
        } => {
            let result = if database {
                let tags: DatabaseTagSet =
                    serde_json::from_str(&tags_json).context("invalid database tag JSON")?;
                state.mapping.expand_database_tag_set(&tags)
            } else {
                let tags: SceneTagSet =
                    serde_json::from_str(&tags_json).context("invalid tag JSON")?;
                state.mapping.expand_tag_set(&tags)
            };
            serde_json::to_value(result)?
        }
        Command::ExpandValue { category, value } => match state.mapping.expand(&value, category) {
            Some(tag) => serde_json::to_value(tag)?,
            None => bail!("tag not found: {}=\"{}\"", category.as_str(), value.trim()),
        },
        Command::Tags { category } => json!({
            "category": category,
            "tags": state.mapping.tags_for_category(category),
        }),
        Command::Validate { tags_json } => {
            let tags: SceneTagSet = serde_json::from_str(&tags_json).context("invalid tag JSON")?;
            let unresolved = state.mapping.validate_tag_set(&tags);
            json!({ "valid": unresolved.is_empty(), "unresolved": unresolved })
        }
        Command::ApplyPack { id, custom_text } => {
            serde_json::to_value(state.scenes.apply_pack_by_id(&id, custom_text.as_deref())?)?
        }
        Command::ApplyTemplate {
            id,
            custom_text,
            variables,
            user_id,
        } => {
            let options = ApplyOptions {
                custom_text,
                variables,
                user_id,
            };
            serde_json::to_value(state.scenes.apply_template_by_id(&id, &options).await?)?
        }
        Command::Search { query, limit } => serde_json::to_value(state.scenes.search(&query, limit).await)?,
        Command::Popular { limit } => serde_json::to_value(state.scenes.popular(limit).await)?,
        Command::Category { name } => serde_json::to_value(state.scenes.by_category(&name).await)?,
        Command::CategoryStats => serde_json::to_value(state.scenes.category_stats().await)?,
        Command::RateTemplate {
            id,
            rating,
            user_id,
        } => serde_json::to_value(
            state
                .scenes
                .rate_template(&id, rating, user_id.as_deref())
                .await?,
        )?,
        Command::ImportTemplates { path } => {
            let imported = state.scenes.import_templates(&path).await?;
            json!({ "imported": imported, "path": path.display().to_string() })
        }
        Command::ParsePrompt { text } => serde_json::to_value(parse_optimized_prompt(&text, &state.index))?,
        Command::SplitPrompt { text } => serde_json::to_value(separate_core_prompt_and_tags(&text))?,
        Command::Analyze { prompt } => serde_json::to_value(state.assistant.analyze_prompt(&prompt).await?)?,
        Command::Optimize {
            prompt,
            target_model,
            options,
            parse,
        } => {
            let request = OptimizationRequest {
                prompt,
                target_model,
                options,
            };
            if parse {
                serde_json::to_value(state.assistant.optimize_and_parse(&request).await?)?
            } else {
                serde_json::to_value(state.assistant.optimize_prompt(&request).await?)?
            }
        }
        Command::Translate { prompt } => {
            serde_json::to_value(state.assistant.translate_prompt(&prompt).await?)?
        }
        Command::Generate(args) => {
            let (request, warnings) = build_generation_request(state, config, &args).await?;
            let urls = state.replicate.generate(&request).await?;
            let upload = match &args.upload_base_filename {
                Some(base_filename) => Some(state.storage.upload_images(&urls, base_filename).await?),
                None => None,
            };
            json!({
                "request": request,
                "urls": urls,
                "warnings": warnings,
                "upload": upload,
            })
        }
        Command::ProcessImage {
            inputs,
            output,
            options,
        } => process_images(&inputs, &output, &options).await?,
        Command::CompressImage {
            input,
            output,
            target_bytes,
            max_iterations,
            options,
        } => {
            let source = load_image_source(&input).await?;
            let compressed = ImageProcessor::new().compress_image(
                &source.bytes,
                target_bytes,
                max_iterations,
                &options,
            )?;
            let mut written = write_output(&output, &compressed.image)?;
            written["iterations"] = json!(compressed.iterations);
            written["reachedTarget"] = json!(compressed.reached_target);
            written
        }
        Command::Thumbnail {
            input,
            output,
            size,
        } => {
            let source = load_image_source(&input).await?;
            let thumbnail = ImageProcessor::new().create_thumbnail(&source.bytes, size)?;
            write_output(&output, &thumbnail)?
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::tests::temp_database_url;
    use crate::db::database::Database;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("image_prompt_studio")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_template_application_with_variables() {
        let command = parse_command(&argv(&[
            "apply-template",
            "lake-dawn",
            "--var",
            "subject=heron",
            "--var",
            "time = dusk",
            "--custom",
            "film grain",
            "--user",
            "u-7",
        ]))
        .unwrap();
        let Command::ApplyTemplate {
            id,
            custom_text,
            variables,
            user_id,
        } = command
        else {
            panic!("unexpected command");
        };
        assert_eq!(id, "lake-dawn");
        assert_eq!(custom_text.as_deref(), Some("film grain"));
        assert_eq!(variables.get("subject").map(String::as_str), Some("heron"));
        assert_eq!(variables.get("time").map(String::as_str), Some("dusk"));
        assert_eq!(user_id.as_deref(), Some("u-7"));
    }

    #[test]
    fn joins_positional_words_into_prompt_text() {
        let command = parse_command(&argv(&["split-prompt", "a", "red", "fox,", "8k"])).unwrap();
        assert_eq!(
            command,
            Command::SplitPrompt {
                text: "a red fox, 8k".to_string()
            }
        );
    }

    #[test]
    fn rejects_missing_values_and_unknown_flags() {
        let err = parse_command(&argv(&["search", "fox", "--limit"])).unwrap_err();
        assert!(err.to_string().contains("Missing value for --limit"));

        let err = parse_command(&argv(&["popular", "--verbose"])).unwrap_err();
        assert!(err.to_string().contains("Unknown popular argument: --verbose"));

        let err = parse_command(&argv(&["search", "fox", "--limit", "many"])).unwrap_err();
        assert!(err.to_string().contains("Invalid --limit value"));

        assert!(parse_command(&argv(&["teleport"])).is_err());
        assert!(parse_command(&argv(&[])).is_err());
        assert!(parse_command(&argv(&["apply-template", "t", "--var", "novalue"])).is_err());
    }

    #[test]
    fn parses_tag_lookup_commands() {
        assert_eq!(
            parse_command(&argv(&["expand", "--category", "artStyle", "anime", "style"])).unwrap(),
            Command::ExpandValue {
                category: TagCategory::ArtStyle,
                value: "anime style".to_string()
            }
        );
        assert_eq!(
            parse_command(&argv(&["tags", "Theme_Style"])).unwrap(),
            Command::Tags {
                category: TagCategory::ThemeStyle
            }
        );
        assert_eq!(
            parse_command(&argv(&["validate", r#"{"mood":"epic"}"#])).unwrap().name(),
            "validate"
        );

        let err = parse_command(&argv(&["tags", "lighting"])).unwrap_err();
        assert!(err.to_string().contains("Unknown tag category: lighting"));
        assert!(parse_command(&argv(&["expand", "--category", "mood"])).is_err());
    }

    #[test]
    fn generate_requires_exactly_one_source() {
        assert!(parse_command(&argv(&["generate"])).is_err());
        assert!(parse_command(&argv(&["generate", "a fox", "--pack", "cyberpunk-city"])).is_err());

        let Command::Generate(args) = parse_command(&argv(&[
            "generate",
            "--pack",
            "cyberpunk-city",
            "--seed",
            "42",
            "--upload",
            "neon",
        ]))
        .unwrap() else {
            panic!("unexpected command");
        };
        assert_eq!(args.pack.as_deref(), Some("cyberpunk-city"));
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.upload_base_filename.as_deref(), Some("neon"));
        assert!(args.prompt.is_none());
    }

    #[test]
    fn parses_image_options() {
        let Command::ProcessImage {
            inputs,
            output,
            options,
        } = parse_command(&argv(&[
            "process-image",
            "a.png",
            "b.png",
            "--output",
            "out",
            "--width",
            "640",
            "--mode",
            "cover",
            "--format",
            "png",
            "--brightness",
            "120",
            "--crop",
            "10,20,300,200",
        ]))
        .unwrap() else {
            panic!("unexpected command");
        };
        assert_eq!(inputs, vec!["a.png", "b.png"]);
        assert_eq!(output, PathBuf::from("out"));
        assert_eq!(options.width, Some(640));
        assert_eq!(options.resize_mode, ResizeMode::Cover);
        assert_eq!(options.format, OutputFormat::Png);
        assert_eq!(options.filters.brightness, 120.0);
        assert_eq!(options.filters.contrast, 100.0);
        assert_eq!(
            options.crop,
            Some(CropRect {
                x: 10,
                y: 20,
                width: 300,
                height: 200
            })
        );

        assert!(parse_command(&argv(&["process-image", "a.png", "--output", "o", "--crop", "1,2"])).is_err());
        assert!(parse_command(&argv(&["compress-image", "a.png", "--output", "o.jpg"])).is_err());

        let Command::CompressImage { target_bytes, .. } = parse_command(&argv(&[
            "compress-image",
            "a.png",
            "--output",
            "o.jpg",
            "--target-kb",
            "50",
        ]))
        .unwrap() else {
            panic!("unexpected command");
        };
        assert_eq!(target_bytes, 50 * 1024);
    }

    #[test]
    fn batch_outputs_use_input_stems() {
        let path = batch_output_path(Path::new("out"), "/tmp/shots/fox.png", 0, OutputFormat::WebP);
        assert_eq!(path, PathBuf::from("out/fox.webp"));
        let path = batch_output_path(Path::new("out"), "/", 2, OutputFormat::Jpeg);
        assert_eq!(path, PathBuf::from("out/image-3.jpg"));
    }

    #[tokio::test]
    async fn runs_offline_commands() {
        let (url, path) = temp_database_url("cli");
        let db = Database::init(&url).await.unwrap();
        let config = Config::load().unwrap();
        let state = AppState::new(&config, db.clone()).unwrap();

        let expanded = run_command(
            &state,
            &config,
            parse_command(&argv(&["expand", r#"{"technical":["macro photography"]}"#])).unwrap(),
        )
        .await
        .unwrap();
        assert!(expanded["prompt"].as_str().unwrap().contains("macro"));

        let single = run_command(
            &state,
            &config,
            parse_command(&argv(&["expand", "--category", "art_style", "  PHOTOREALISTIC "])).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(single["label"], json!("Photorealistic"));
        assert!(run_command(
            &state,
            &config,
            parse_command(&argv(&["expand", "--category", "mood", "glitter"])).unwrap(),
        )
        .await
        .is_err());

        let moods = run_command(&state, &config, parse_command(&argv(&["tags", "mood"])).unwrap())
            .await
            .unwrap();
        assert_eq!(moods["category"], json!("mood"));
        assert_eq!(moods["tags"][0]["label"], json!("Warm"));

        let validated = run_command(
            &state,
            &config,
            parse_command(&argv(&[
                "validate",
                r#"{"artStyle":"anime style","enhancement":["glitter"]}"#,
            ]))
            .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(validated["valid"], json!(false));
        assert_eq!(
            validated["unresolved"],
            json!([{ "field": "enhancement", "value": "glitter" }])
        );

        let applied = run_command(
            &state,
            &config,
            parse_command(&argv(&["apply-pack", "cyberpunk-city", "--custom", "rain"])).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(applied["config"]["numInferenceSteps"], json!(30));
        assert!(applied["fullPrompt"].as_str().unwrap().ends_with("rain"));

        let (request, _) = build_generation_request(
            &state,
            &config,
            &GenerateArgs {
                prompt: Some("a fox".to_string()),
                model: Some("black-forest-labs/flux-dev".to_string()),
                seed: Some(7),
                ..GenerateArgs::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(request.num_inference_steps, 28);
        assert_eq!(request.seed, Some(7));

        db.close().await;
        let _ = std::fs::remove_file(path);
    }
}
