pub mod catalog;
pub mod index;
pub mod mapping;

pub use catalog::{catalog, Tag, TagCategory};
pub use index::TagIndex;
pub use mapping::{
    join_prompt_parts, DatabaseTagSet, ExpandedTag, SceneTagSet, TagExpansionResult,
    TagMappingService,
};
