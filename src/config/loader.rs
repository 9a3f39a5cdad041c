//! Configuration Loader
//!
//! Layers configuration sources in increasing precedence:
//! 1. the profile for the detected environment
//! 2. an optional file (TOML, YAML or JSON, chosen by extension)
//! 3. `POS_QUERY__<SECTION>__<FIELD>` environment variables
//!
//! The merged result is validated before it is handed out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::MiddlewareConfig;
use crate::constants;

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: MiddlewareConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load with environment auto-detection and no file
    pub fn load() -> ConfigResult<Arc<ConfigLoader>> {
        Self::load_from(None::<&Path>)
    }

    /// Load, layering the given file over the environment profile
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<Arc<ConfigLoader>> {
        let environment = MiddlewareConfig::detect_environment();
        Self::load_with_env(path, &environment)
    }

    /// Load with an explicit environment name
    pub fn load_with_env<P: AsRef<Path>>(
        path: Option<P>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigLoader>> {
        let profile = match environment {
            "test" => MiddlewareConfig::for_test(),
            "development" => MiddlewareConfig::for_development(),
            _ => MiddlewareConfig::default(),
        };

        let mut builder = config::Config::builder().add_source(config::Config::try_from(&profile)?);

        let source_file = path.map(|p| p.as_ref().to_path_buf());
        if let Some(file) = &source_file {
            if !file.exists() {
                return Err(ConfigurationError::LoadFailed {
                    source_name: file.display().to_string(),
                    message: "file does not exist".to_string(),
                });
            }
            debug!("Layering configuration file: {}", file.display());
            builder = builder.add_source(config::File::from(file.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(constants::env::OVERRIDE_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: MiddlewareConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = environment,
            file = ?source_file,
            max_concurrent = config.admission.max_concurrent,
            "Middleware configuration loaded"
        );

        Ok(Arc::new(ConfigLoader {
            config,
            environment: environment.to_string(),
            source_file,
        }))
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_profile_without_file() {
        let loader = ConfigLoader::load_with_env(None::<&Path>, "test").unwrap();
        assert_eq!(loader.environment(), "test");
        assert_eq!(loader.config().admission.max_concurrent, 4);
        assert!(loader.source_file().is_none());
    }

    #[test]
    fn test_toml_file_overrides_profile() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[admission]\nmax_concurrent = 3\n\n[monitor]\nwarning_ms = 200\ncritical_ms = 900"
        )
        .unwrap();

        let loader = ConfigLoader::load_with_env(Some(file.path()), "production").unwrap();
        assert_eq!(loader.config().admission.max_concurrent, 3);
        assert_eq!(loader.config().monitor.warning_ms, 200);
        assert_eq!(loader.config().monitor.critical_ms, 900);
        // untouched sections keep the production profile
        assert_eq!(loader.config().result_cache.max_entries, 500);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[admission]\nmax_concurrent = 0").unwrap();

        let result = ConfigLoader::load_with_env(Some(file.path()), "production");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ConfigLoader::load_with_env(Some("/nonexistent/pos-query.toml"), "test");
        assert!(matches!(result, Err(ConfigurationError::LoadFailed { .. })));
    }
}
