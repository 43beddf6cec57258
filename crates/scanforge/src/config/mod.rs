pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, ENGINE_BINARY_ENV};
pub use schema::{Config, ExtractionConfig, ReconstructionConfig};
