pub mod server;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid value for '{key}': {details}")]
    InvalidValue { key: String, details: String },
}

/// Deployment environment, selected by `APP_ENV`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Name and version of the running binary, captured at compile time
#[derive(Clone, Debug)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

/// Build an [`AppInfo`] from the calling crate's Cargo metadata
#[macro_export]
macro_rules! app_info {
    () => {
        $crate::AppInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    };
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load an environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load an environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Load an optional environment variable, treating empty strings as unset
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable into `T`, falling back to `default` when unset.
///
/// A value that is present but unparseable is an error rather than a silent default.
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Interpret common truthy spellings ("1", "true", "yes", "on")
pub fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("NOTIFIER_MISSING_REQUIRED", || {
            let err = env_required("NOTIFIER_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("NOTIFIER_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_optional_treats_blank_as_unset() {
        temp_env::with_var("NOTIFIER_BLANK", Some("   "), || {
            assert_eq!(env_optional("NOTIFIER_BLANK"), None);
        });
        temp_env::with_var("NOTIFIER_BLANK", Some("value"), || {
            assert_eq!(env_optional("NOTIFIER_BLANK").as_deref(), Some("value"));
        });
    }

    #[test]
    fn test_env_parse_or_default_and_value() {
        temp_env::with_var_unset("NOTIFIER_COUNT", || {
            assert_eq!(env_parse_or("NOTIFIER_COUNT", 10usize).unwrap(), 10);
        });
        temp_env::with_var("NOTIFIER_COUNT", Some(" 25 "), || {
            assert_eq!(env_parse_or("NOTIFIER_COUNT", 10usize).unwrap(), 25);
        });
    }

    #[test]
    fn test_env_parse_or_rejects_garbage() {
        temp_env::with_var("NOTIFIER_COUNT", Some("ten"), || {
            let err = env_parse_or("NOTIFIER_COUNT", 10usize).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "NOTIFIER_COUNT"));
        });
    }

    #[test]
    fn test_env_flag() {
        temp_env::with_var("NOTIFIER_FLAG", Some("TRUE"), || assert!(env_flag("NOTIFIER_FLAG")));
        temp_env::with_var("NOTIFIER_FLAG", Some("1"), || assert!(env_flag("NOTIFIER_FLAG")));
        temp_env::with_var("NOTIFIER_FLAG", Some("no"), || assert!(!env_flag("NOTIFIER_FLAG")));
        temp_env::with_var_unset("NOTIFIER_FLAG", || assert!(!env_flag("NOTIFIER_FLAG")));
    }

    #[test]
    fn test_app_info_macro() {
        let info = app_info!();
        assert_eq!(info.name, "core_config");
        assert!(!info.version.is_empty());
    }
}
