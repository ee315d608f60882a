pub mod loader;
pub mod schema;

pub use loader::{CONFIG_ENV, ConfigError, ConfigLoader, search_paths};
pub use schema::{LookoutConfig, ReportingConfig, WaitDefaults};
