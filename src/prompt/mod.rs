pub mod parser;
pub mod separator;
pub mod similarity;

pub use parser::{parse_optimized_prompt, ParsedPromptResult};
pub use separator::{separate_core_prompt_and_tags, CoreTagSplit};
