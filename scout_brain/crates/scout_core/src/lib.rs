pub mod modules;

pub use modules::catalog::{Catalog, CatalogError, Tone3000Catalog};
pub use modules::config::PipelineConfig;
pub use modules::gemini::{GeminiClient, GeminiError, JsonModel};
pub use modules::pipeline::{run_download, Pipeline};
