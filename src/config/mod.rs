mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./planet-dumper.toml",
        "~/.config/planet-dumper/config.toml",
        "/etc/planet-dumper/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let upload = &config.s3.upload;
    if upload.concurrency == 0 {
        anyhow::bail!("s3.upload.concurrency must be at least 1");
    }
    if upload.part_size_bytes < MIN_PART_SIZE_BYTES {
        anyhow::bail!(
            "s3.upload.part_size_bytes must be at least {} bytes, got {}",
            MIN_PART_SIZE_BYTES,
            upload.part_size_bytes
        );
    }

    let token = &config.dump_server.token;
    if token.enabled && token.value.as_deref().map_or(true, str::is_empty) {
        anyhow::bail!("dump_server.token is enabled but has no value");
    }

    let tracker = &config.action_tracker;
    if tracker.enabled && tracker.endpoint.is_none() {
        anyhow::bail!("action_tracker is enabled but has no endpoint");
    }

    if config.postgres.enable_ssl_auth {
        let paths = &config.postgres.ssl_paths;
        for path in [&paths.ca, &paths.cert, &paths.key].into_iter().flatten() {
            if !path.exists() {
                tracing::warn!("SSL file does not exist: {:?}", path);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_from_file() {
        let file = write_config(
            r#"
workdir = "/srv/dumps"

[dump_server.token]
enabled = true
value = "secret"
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workdir, Path::new("/srv/dumps"));
        assert_eq!(config.dump_server.token.bearer(), Some("secret"));
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let file = write_config("workdir = [");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_missing_custom_path_is_an_error() {
        let err = load_config_or_default(Some(Path::new("/nonexistent/planet-dumper.toml")));
        assert!(err.is_err());
    }

    #[test]
    fn test_validation_rejects_small_parts() {
        let mut config = Config::default();
        config.s3.upload.part_size_bytes = 1024;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("part_size_bytes"));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.s3.upload.concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_enabled_token_without_value() {
        let mut config = Config::default();
        config.dump_server.token.enabled = true;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_tracker_without_endpoint() {
        let mut config = Config::default();
        config.action_tracker.enabled = true;
        assert!(validate_config(&config).is_err());

        config.action_tracker.endpoint = Some("http://tracker".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
