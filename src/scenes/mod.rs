pub mod integration;
pub mod packs;
pub mod template;

pub use integration::{ApplyOptions, GenerationConfig, GenerationDefaults, SceneIntegrationService};
pub use packs::ScenePackLibrary;
