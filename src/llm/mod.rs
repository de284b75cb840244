pub mod assistant;
pub mod openrouter;
pub mod replicate;
