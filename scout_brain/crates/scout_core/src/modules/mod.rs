pub mod advisor;
pub mod catalog;
pub mod cleaner;
pub mod config;
pub mod downloader;
pub mod gemini;
pub mod journal;
pub mod paths;
pub mod pipeline;
pub mod pool;
pub mod resolver;
pub mod selection;
pub mod system_prompt;
