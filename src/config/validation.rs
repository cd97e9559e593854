use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.base_path.chars().any(char::is_whitespace) {
        return Err(validation_err("server.base_path cannot contain whitespace"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if reqwest::Url::parse(&upstream.endpoint()).is_err() {
        return Err(validation_err(format!(
            "upstream endpoint '{}' is not a valid URL",
            upstream.endpoint()
        )));
    }
    if let Some(key) = upstream.api_key.as_deref() {
        if key.trim().is_empty() {
            return Err(validation_err("upstream.api_key cannot be empty when set"));
        }
    }
    validate_proxy_url(upstream.proxy.as_deref())?;
    Ok(())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err("upstream.proxy cannot be empty when set"));
    }
    let parsed = reqwest::Url::parse(proxy)
        .map_err(|err| validation_err(format!("upstream.proxy is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err("upstream.proxy must use http:// or https://"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: Some("sk-test".to_string()),
                path: "/chat/completions".to_string(),
                proxy: None,
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.upstream.base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.upstream.api_key = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = make_valid_config();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = make_valid_config();
        config.server.timeout = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_base_path_without_leading_slash_is_accepted() {
        let mut config = make_valid_config();
        config.server.base_path = "api".to_string();
        assert!(validate_config(&config).is_ok());
        config.server.base_path = "/api".to_string();
        assert!(validate_config(&config).is_ok());
        config.server.base_path = "/my api".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_proxy_scheme() {
        let mut config = make_valid_config();
        config.upstream.proxy = Some("ftp://proxy:21".to_string());
        assert!(validate_config(&config).is_err());
        config.upstream.proxy = Some("http://proxy:8080".to_string());
        assert!(validate_config(&config).is_ok());
        config.upstream.proxy = Some(String::new());
        assert!(validate_config(&config).is_err());
    }
}
