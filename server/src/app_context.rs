use std::{net::SocketAddr, path::Path};

use crate::config::{read_or_create_config, ConfigToml};

#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub config: ConfigToml,
}

impl AppContext {
    /// Defaults, then the optional config file, then the `DNS_*` environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = match config_path {
            Some(path) => read_or_create_config(path)?,
            None => ConfigToml::default(),
        };
        config.apply_env_overrides();
        Ok(Self { config })
    }

    /// Command line flags win over every other layer.
    pub fn apply_cli(&mut self, forward: Option<SocketAddr>, verbose: bool) {
        if let Some(forward) = forward {
            self.config.upstream.forward = forward;
        }
        if verbose {
            self.config.general.verbose = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catdns.toml");
        std::fs::write(&path, "[categories]\ntimeout_ms = 100\n").unwrap();

        let context = AppContext::load(Some(&path)).unwrap();
        assert_eq!(context.config.categories.timeout_ms, 100);
    }

    #[test]
    fn cli_overrides_config() {
        let mut context = AppContext::default();
        context.apply_cli(Some("8.8.4.4:53".parse().unwrap()), true);
        assert_eq!(context.config.upstream.forward, "8.8.4.4:53".parse().unwrap());
        assert!(context.config.general.verbose);

        context.apply_cli(None, false);
        assert_eq!(context.config.upstream.forward, "8.8.4.4:53".parse().unwrap());
        assert!(context.config.general.verbose);
    }
}
