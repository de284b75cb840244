use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_QUALITY: f32 = 0.9;
const MIN_COMPRESS_QUALITY: f32 = 0.1;
const MAX_COMPRESS_QUALITY: f32 = 0.9;
const THUMBNAIL_QUALITY: f32 = 0.8;
const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("invalid image options: {0}")]
    Validation(String),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not fetch image: {0}")]
    Fetch(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    #[default]
    Contain,
    Cover,
    Stretch,
    Pad,
}

impl FromStr for ResizeMode {
    type Err = ImageProcessingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "contain" => Ok(ResizeMode::Contain),
            "cover" => Ok(ResizeMode::Cover),
            "stretch" | "fill" => Ok(ResizeMode::Stretch),
            "pad" => Ok(ResizeMode::Pad),
            other => Err(ImageProcessingError::Validation(format!(
                "unknown resize mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::WebP)
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ImageProcessingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(ImageProcessingError::Validation(format!(
                "unsupported output format '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// Percentages use 100 as identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub blur: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            blur: 0.0,
        }
    }
}

impl FilterParams {
    pub fn is_identity(&self) -> bool {
        self.css_filter().is_none()
    }

    pub fn css_filter(&self) -> Option<String> {
        let mut parts = Vec::new();
        if (self.brightness - 100.0).abs() > f32::EPSILON {
            parts.push(format!("brightness({}%)", self.brightness));
        }
        if (self.contrast - 100.0).abs() > f32::EPSILON {
            parts.push(format!("contrast({}%)", self.contrast));
        }
        if (self.saturation - 100.0).abs() > f32::EPSILON {
            parts.push(format!("saturate({}%)", self.saturation));
        }
        if self.blur > 0.0 {
            parts.push(format!("blur({}px)", self.blur));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    fn validate(&self) -> Result<(), ImageProcessingError> {
        let values = [self.brightness, self.contrast, self.saturation, self.blur];
        if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(ImageProcessingError::Validation(
                "filter values must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resize_mode: ResizeMode,
    pub crop: Option<CropRect>,
    pub filters: FilterParams,
    pub format: OutputFormat,
    pub quality: f32,
    pub background: [u8; 4],
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            resize_mode: ResizeMode::Contain,
            crop: None,
            filters: FilterParams::default(),
            format: OutputFormat::Jpeg,
            quality: DEFAULT_QUALITY,
            background: [255, 255, 255, 255],
        }
    }
}

impl ProcessOptions {
    fn validate(&self) -> Result<(), ImageProcessingError> {
        for dimension in [self.width, self.height].into_iter().flatten() {
            if dimension == 0 || dimension > MAX_DIMENSION {
                return Err(ImageProcessingError::Validation(format!(
                    "target dimensions must be between 1 and {MAX_DIMENSION}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(ImageProcessingError::Validation(
                "quality must be between 0 and 1".to_string(),
            ));
        }
        self.filters.validate()
    }
}

// Cover cuts `source_region` out of the source first so the resize never exceeds the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub draw_width: u32,
    pub draw_height: u32,
    pub offset_x: i64,
    pub offset_y: i64,
    pub source_region: Option<CropRect>,
}

fn scaled(value: u32, scale: f64) -> u32 {
    ((value as f64 * scale).round() as u32).max(1)
}

fn scaled_axis(value: u32, scale: f64) -> u32 {
    scaled(value, scale).min(MAX_DIMENSION)
}

fn cover_region(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> CropRect {
    let box_aspect = box_w as f64 / box_h as f64;
    let src_aspect = src_w as f64 / src_h as f64;
    let (width, height) = if src_aspect > box_aspect {
        (((src_h as f64 * box_aspect).round() as u32).clamp(1, src_w), src_h)
    } else {
        (src_w, ((src_w as f64 / box_aspect).round() as u32).clamp(1, src_h))
    };
    CropRect {
        x: (src_w - width) / 2,
        y: (src_h - height) / 2,
        width,
        height,
    }
}

pub fn compute_placement(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
    mode: ResizeMode,
) -> Placement {
    let simple = |w: u32, h: u32| Placement {
        canvas_width: w,
        canvas_height: h,
        draw_width: w,
        draw_height: h,
        offset_x: 0,
        offset_y: 0,
        source_region: None,
    };

    let (box_w, box_h) = match (width, height) {
        (None, None) => return simple(src_w, src_h),
        (Some(w), None) => return simple(w, scaled_axis(src_h, w as f64 / src_w as f64)),
        (None, Some(h)) => return simple(scaled_axis(src_w, h as f64 / src_h as f64), h),
        (Some(w), Some(h)) => (w, h),
    };

    let scale_x = box_w as f64 / src_w as f64;
    let scale_y = box_h as f64 / src_h as f64;
    match mode {
        ResizeMode::Stretch => simple(box_w, box_h),
        ResizeMode::Contain => {
            let scale = scale_x.min(scale_y);
            simple(scaled(src_w, scale).min(box_w), scaled(src_h, scale).min(box_h))
        }
        ResizeMode::Cover => Placement {
            source_region: Some(cover_region(src_w, src_h, box_w, box_h)),
            ..simple(box_w, box_h)
        },
        ResizeMode::Pad => {
            let scale = scale_x.min(scale_y);
            let draw_w = scaled(src_w, scale).min(box_w);
            let draw_h = scaled(src_h, scale).min(box_h);
            Placement {
                canvas_width: box_w,
                canvas_height: box_h,
                draw_width: draw_w,
                draw_height: draw_h,
                offset_x: (box_w - draw_w) as i64 / 2,
                offset_y: (box_h - draw_h) as i64 / 2,
                source_region: None,
            }
        }
    }
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn apply_filters(mut image: RgbaImage, filters: &FilterParams) -> RgbaImage {
    if filters.is_identity() {
        return image;
    }

    let brightness = filters.brightness / 100.0;
    let contrast = filters.contrast / 100.0;
    let saturation = filters.saturation / 100.0;
    for pixel in image.pixels_mut() {
        let mut rgb = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
        for channel in rgb.iter_mut() {
            *channel *= brightness;
            *channel = (*channel - 127.5) * contrast + 127.5;
        }
        let luma = 0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2];
        for (index, channel) in rgb.iter().enumerate() {
            pixel[index] = clamp_channel(luma + (channel - luma) * saturation);
        }
    }

    if filters.blur > 0.0 {
        imageops::blur(&image, filters.blur)
    } else {
        image
    }
}

fn flatten_onto(image: &RgbaImage, background: [u8; 4]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(image.width() as usize * image.height() as usize * 3);
    for pixel in image.pixels() {
        let alpha = pixel[3] as f32 / 255.0;
        for index in 0..3 {
            let blended = pixel[index] as f32 * alpha + background[index] as f32 * (1.0 - alpha);
            rgb.push(clamp_channel(blended));
        }
    }
    rgb
}

fn encode(
    surface: &RgbaImage,
    format: OutputFormat,
    quality: f32,
    background: [u8; 4],
) -> Result<Vec<u8>, ImageProcessingError> {
    let (width, height) = surface.dimensions();
    let mut buffer = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            let rgb = flatten_onto(surface, background);
            let jpeg_quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            JpegEncoder::new_with_quality(&mut buffer, jpeg_quality).write_image(
                &rgb,
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut buffer).write_image(
                surface.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::WebP => {
            // lossless only; quality does not apply
            WebPEncoder::new_lossless(&mut buffer).write_image(
                surface.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    Ok(buffer.into_inner())
}

pub fn to_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub mime_type: String,
    pub quality: f32,
    pub resize_mode: ResizeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub original_size: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImage {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub data_url: String,
    pub metadata: ImageMetadata,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ProcessedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedImage {
    pub image: ProcessedImage,
    pub iterations: u32,
    pub reached_target: bool,
}

#[derive(Debug)]
pub struct ImageProcessor {
    surface: RgbaImage,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            surface: RgbaImage::new(1, 1),
        }
    }

    fn prepare_surface(&mut self, width: u32, height: u32, fill: Rgba<u8>) {
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbaImage::new(width, height);
        }
        for pixel in self.surface.pixels_mut() {
            *pixel = fill;
        }
    }

    pub fn process_image(
        &mut self,
        input: &[u8],
        options: &ProcessOptions,
    ) -> Result<ProcessedImage, ImageProcessingError> {
        options.validate()?;
        if input.is_empty() {
            return Err(ImageProcessingError::Validation("image data is empty".to_string()));
        }

        let decoded = image::load_from_memory(input)?.to_rgba8();
        let (original_width, original_height) = decoded.dimensions();

        let source = match options.crop {
            Some(crop) => {
                let fits = crop.width > 0
                    && crop.height > 0
                    && crop.x.saturating_add(crop.width) <= original_width
                    && crop.y.saturating_add(crop.height) <= original_height;
                if !fits {
                    return Err(ImageProcessingError::Validation(format!(
                        "crop {}x{}+{}+{} is outside the {}x{} image",
                        crop.width, crop.height, crop.x, crop.y, original_width, original_height
                    )));
                }
                imageops::crop_imm(&decoded, crop.x, crop.y, crop.width, crop.height).to_image()
            }
            None => decoded,
        };

        let placement = compute_placement(
            source.width(),
            source.height(),
            options.width,
            options.height,
            options.resize_mode,
        );
        let source = match placement.source_region {
            Some(region) => {
                imageops::crop_imm(&source, region.x, region.y, region.width, region.height)
                    .to_image()
            }
            None => source,
        };
        let drawn = if (placement.draw_width, placement.draw_height) == source.dimensions() {
            source
        } else {
            imageops::resize(
                &source,
                placement.draw_width,
                placement.draw_height,
                FilterType::Lanczos3,
            )
        };
        let drawn = apply_filters(drawn, &options.filters);

        let fill = if options.resize_mode == ResizeMode::Pad {
            Rgba(options.background)
        } else {
            Rgba([0, 0, 0, 0])
        };
        self.prepare_surface(placement.canvas_width, placement.canvas_height, fill);
        imageops::overlay(&mut self.surface, &drawn, placement.offset_x, placement.offset_y);

        let bytes = encode(&self.surface, options.format, options.quality, options.background)?;
        let compression_ratio = bytes.len() as f64 / input.len() as f64;
        debug!(
            "Processed image {}x{} -> {}x{} {} ({} -> {} bytes)",
            original_width,
            original_height,
            placement.canvas_width,
            placement.canvas_height,
            options.format,
            input.len(),
            bytes.len()
        );

        let metadata = ImageMetadata {
            original_width,
            original_height,
            width: placement.canvas_width,
            height: placement.canvas_height,
            format: options.format,
            mime_type: options.format.mime_type().to_string(),
            quality: options.quality,
            resize_mode: options.resize_mode,
            filter: options.filters.css_filter(),
            original_size: input.len(),
            size: bytes.len(),
        };
        Ok(ProcessedImage {
            data_url: to_data_url(&bytes, options.format.mime_type()),
            bytes,
            metadata,
            compression_ratio,
        })
    }

    pub fn batch_process(&mut self, inputs: &[Vec<u8>], options: &ProcessOptions) -> Vec<BatchItem> {
        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| match self.process_image(input, options) {
                Ok(image) => BatchItem {
                    index,
                    image: Some(image),
                    error: None,
                },
                Err(err) => {
                    warn!("Batch item {} failed: {}", index, err);
                    BatchItem {
                        index,
                        image: None,
                        error: Some(err.to_string()),
                    }
                }
            })
            .collect()
    }

    pub fn compress_image(
        &mut self,
        input: &[u8],
        target_bytes: usize,
        max_iterations: u32,
        options: &ProcessOptions,
    ) -> Result<CompressedImage, ImageProcessingError> {
        if target_bytes == 0 {
            return Err(ImageProcessingError::Validation(
                "target size must be positive".to_string(),
            ));
        }
        if options.format.is_lossless() {
            let image = self.process_image(input, options)?;
            let reached_target = image.bytes.len() <= target_bytes;
            return Ok(CompressedImage {
                image,
                iterations: 1,
                reached_target,
            });
        }

        let max_iterations = max_iterations.max(1);
        let mut options = options.clone();
        options.quality = MAX_COMPRESS_QUALITY;

        let mut iterations = 0;
        loop {
            let image = self.process_image(input, &options)?;
            iterations += 1;
            let size = image.bytes.len();
            if size <= target_bytes {
                return Ok(CompressedImage {
                    image,
                    iterations,
                    reached_target: true,
                });
            }

            let next_quality = (options.quality * target_bytes as f32 / size as f32)
                .clamp(MIN_COMPRESS_QUALITY, MAX_COMPRESS_QUALITY);
            let stuck = (next_quality - options.quality).abs() < f32::EPSILON;
            if iterations >= max_iterations || stuck {
                debug!(
                    "Compression stopped at {} bytes (target {}) after {} iteration(s)",
                    size, target_bytes, iterations
                );
                return Ok(CompressedImage {
                    image,
                    iterations,
                    reached_target: false,
                });
            }
            options.quality = next_quality;
        }
    }

    pub fn create_thumbnail(&mut self, input: &[u8], size: u32) -> Result<ProcessedImage, ImageProcessingError> {
        let options = ProcessOptions {
            width: Some(size),
            height: Some(size),
            resize_mode: ResizeMode::Cover,
            format: OutputFormat::Jpeg,
            quality: THUMBNAIL_QUALITY,
            ..ProcessOptions::default()
        };
        self.process_image(input, &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x * y) % 256) as u8, 255])
        });
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn placement_geometry_per_mode() {
        let contain = compute_placement(400, 200, Some(100), Some(100), ResizeMode::Contain);
        assert_eq!((contain.canvas_width, contain.canvas_height), (100, 50));

        let cover = compute_placement(400, 200, Some(100), Some(100), ResizeMode::Cover);
        assert_eq!((cover.canvas_width, cover.canvas_height), (100, 100));
        assert_eq!((cover.draw_width, cover.draw_height), (100, 100));
        assert_eq!(
            cover.source_region,
            Some(CropRect {
                x: 100,
                y: 0,
                width: 200,
                height: 200
            })
        );

        let stretch = compute_placement(400, 200, Some(100), Some(100), ResizeMode::Stretch);
        assert_eq!((stretch.draw_width, stretch.draw_height), (100, 100));

        let pad = compute_placement(400, 200, Some(100), Some(100), ResizeMode::Pad);
        assert_eq!((pad.canvas_width, pad.canvas_height), (100, 100));
        assert_eq!((pad.draw_width, pad.draw_height), (100, 50));
        assert_eq!((pad.offset_x, pad.offset_y), (0, 25));

        let width_only = compute_placement(400, 200, Some(100), None, ResizeMode::Cover);
        assert_eq!((width_only.canvas_width, width_only.canvas_height), (100, 50));
        let untouched = compute_placement(40, 20, None, None, ResizeMode::Pad);
        assert_eq!((untouched.canvas_width, untouched.canvas_height), (40, 20));
    }

    #[test]
    fn thin_sources_stay_within_the_output_box() {
        let cover = compute_placement(1, 4000, Some(512), Some(512), ResizeMode::Cover);
        assert_eq!((cover.draw_width, cover.draw_height), (512, 512));
        assert_eq!(
            cover.source_region,
            Some(CropRect {
                x: 0,
                y: 1999,
                width: 1,
                height: 1
            })
        );

        let tall = compute_placement(1, 1000, Some(MAX_DIMENSION), None, ResizeMode::Contain);
        assert_eq!((tall.canvas_width, tall.canvas_height), (MAX_DIMENSION, MAX_DIMENSION));
        let wide = compute_placement(1000, 1, None, Some(MAX_DIMENSION), ResizeMode::Contain);
        assert_eq!(wide.canvas_width, MAX_DIMENSION);

        let thumbnail = ImageProcessor::new()
            .create_thumbnail(&png_bytes(1, 4000), 64)
            .unwrap();
        assert_eq!((thumbnail.metadata.width, thumbnail.metadata.height), (64, 64));
    }

    #[test]
    fn css_filter_lists_only_changed_parameters() {
        assert_eq!(FilterParams::default().css_filter(), None);
        let filters = FilterParams {
            brightness: 120.0,
            saturation: 0.0,
            blur: 2.0,
            ..FilterParams::default()
        };
        assert_eq!(
            filters.css_filter().as_deref(),
            Some("brightness(120%) saturate(0%) blur(2px)")
        );
    }

    #[test]
    fn zero_saturation_produces_gray_pixels() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([200, 40, 10, 255]));
        let filters = FilterParams {
            saturation: 0.0,
            ..FilterParams::default()
        };
        let filtered = apply_filters(image, &filters);
        let pixel = filtered.get_pixel(0, 0);
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn process_image_resizes_and_encodes() {
        let input = png_bytes(64, 32);
        let mut processor = ImageProcessor::new();
        let options = ProcessOptions {
            width: Some(32),
            height: Some(32),
            resize_mode: ResizeMode::Pad,
            format: OutputFormat::Png,
            filters: FilterParams {
                contrast: 150.0,
                ..FilterParams::default()
            },
            ..ProcessOptions::default()
        };
        let processed = processor.process_image(&input, &options).unwrap();
        assert_eq!(processed.metadata.original_width, 64);
        assert_eq!((processed.metadata.width, processed.metadata.height), (32, 32));
        assert_eq!(processed.metadata.filter.as_deref(), Some("contrast(150%)"));
        assert!(processed.data_url.starts_with("data:image/png;base64,"));

        let decoded = image::load_from_memory(&processed.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (32, 32));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn crop_outside_image_is_rejected() {
        let input = png_bytes(16, 16);
        let options = ProcessOptions {
            crop: Some(CropRect {
                x: 10,
                y: 0,
                width: 10,
                height: 4,
            }),
            ..ProcessOptions::default()
        };
        assert!(matches!(
            ImageProcessor::new().process_image(&input, &options),
            Err(ImageProcessingError::Validation(_))
        ));
    }

    #[test]
    fn batch_continues_after_failure() {
        let mut processor = ImageProcessor::new();
        let inputs = vec![png_bytes(8, 8), b"not an image".to_vec(), png_bytes(4, 6)];
        let results = processor.batch_process(&inputs, &ProcessOptions::default());
        assert_eq!(results.len(), 3);
        assert!(results[0].image.is_some());
        assert!(results[1].error.is_some());
        assert_eq!(results[2].image.as_ref().unwrap().metadata.height, 6);
    }

    #[test]
    fn compression_stops_within_max_iterations() {
        let input = png_bytes(96, 96);
        let mut processor = ImageProcessor::new();
        let compressed = processor
            .compress_image(&input, 1, 3, &ProcessOptions::default())
            .unwrap();
        assert!(!compressed.reached_target);
        assert!(compressed.iterations <= 3);
        assert!(compressed.image.metadata.quality >= MIN_COMPRESS_QUALITY);
        assert!(compressed.image.metadata.quality <= MAX_COMPRESS_QUALITY);
    }

    #[test]
    fn lossless_formats_are_encoded_once() {
        let input = png_bytes(96, 96);
        let options = ProcessOptions {
            format: OutputFormat::Png,
            ..ProcessOptions::default()
        };
        let compressed = ImageProcessor::new()
            .compress_image(&input, 1, 6, &options)
            .unwrap();
        assert_eq!(compressed.iterations, 1);
        assert!(!compressed.reached_target);
        assert_eq!(compressed.image.metadata.quality, options.quality);
    }

    #[test]
    fn generous_target_is_met_on_first_pass() {
        let input = png_bytes(16, 16);
        let compressed = ImageProcessor::new()
            .compress_image(&input, 10 * 1024 * 1024, 5, &ProcessOptions::default())
            .unwrap();
        assert!(compressed.reached_target);
        assert_eq!(compressed.iterations, 1);
    }

    #[test]
    fn thumbnail_is_square_jpeg() {
        let input = png_bytes(120, 60);
        let thumbnail = ImageProcessor::new().create_thumbnail(&input, 48).unwrap();
        assert_eq!((thumbnail.metadata.width, thumbnail.metadata.height), (48, 48));
        assert_eq!(thumbnail.metadata.format, OutputFormat::Jpeg);
        assert!(thumbnail.data_url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn parses_format_and_mode_names() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);
        assert!("gif".parse::<OutputFormat>().is_err());
        assert_eq!("cover".parse::<ResizeMode>().unwrap(), ResizeMode::Cover);
    }
}
