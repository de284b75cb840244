pub mod processor;
pub mod source;

pub use processor::{
    CropRect, FilterParams, ImageProcessor, OutputFormat, ProcessOptions, ProcessedImage,
    ResizeMode,
};
pub use source::load_image_source;
