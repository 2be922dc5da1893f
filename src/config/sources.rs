use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "PARAFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/parafetch.toml";
const ENV_PREFIX: &str = "PARAFETCH";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `PARAFETCH_CONFIG` or `config/parafetch.toml`
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// File actually read: `explicit` when given, else [`default_path`]
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(default_path, Path::to_path_buf)
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    load_from_sources(&default_path())
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: &Path) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::debug!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // PARAFETCH__DOWNLOAD__THREADS -> download.threads
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(&config_path).unwrap();
        assert_eq!(config.download.segments, 1);
        assert_eq!(config.http.max_redirects, 10);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[download]
dir = "/var/tmp/downloads"
threads = 8
segments = 4
buffer_size = "256KB"

[http]
connect_timeout_secs = 5
request_timeout_secs = 3600
user_agent = "mirror-bot/2.0"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(&config_path).unwrap();
        assert_eq!(config.download.dir, PathBuf::from("/var/tmp/downloads"));
        assert_eq!(config.download.threads, 8);
        assert_eq!(config.download.segments, 4);
        assert_eq!(config.download.buffer_size.as_u64(), 256 * 1024);
        assert_eq!(config.http.connect_timeout_secs, 5);
        assert_eq!(config.http.request_timeout_secs, 3600);
        assert_eq!(config.http.user_agent, "mirror-bot/2.0");
        // Untouched sections keep their defaults
        assert_eq!(config.http.max_redirects, 10);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_numeric_buffer_size() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[download]\nbuffer_size = 4096\n").unwrap();

        let config = load_from_sources(&config_path).unwrap();
        assert_eq!(config.download.buffer_size.as_u64(), 4096);
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("written.toml");

        let mut original = Config::default();
        original.download.threads = 3;
        original.download.segments = 5;
        fs::write(&config_path, toml::to_string(&original).unwrap()).unwrap();

        let config = load_from_sources(&config_path).unwrap();
        assert_eq!(config.download.threads, 3);
        assert_eq!(config.download.segments, 5);
        assert_eq!(config.download.buffer_size, original.download.buffer_size);
        assert_eq!(config.http.user_agent, original.http.user_agent);
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/etc/parafetch/custom.toml");
        assert_eq!(resolve_path(Some(explicit)), explicit);
        assert_eq!(resolve_path(None), default_path());
    }

    // Environment overrides are not exercised here: env::set_var is unsafe
    // and races with other tests in the same process.
}
