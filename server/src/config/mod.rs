mod config_file;
mod env_overrides;

pub use config_file::{read_or_create_config, ConfigToml};
