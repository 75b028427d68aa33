use crate::{ConfigError, FromEnv, env_or_default, env_parse_or};
use std::net::Ipv4Addr;

/// Bind address for the admin/health HTTP listener
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8085;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for ServerConfig {
    /// - `ADMIN_HOST`: defaults to 0.0.0.0
    /// - `ADMIN_PORT`: defaults to 8085
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("ADMIN_HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse_or("ADMIN_PORT", Self::DEFAULT_PORT)?;
        Ok(Self { host, port })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED.to_string(), Self::DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        temp_env::with_vars([("ADMIN_HOST", None::<&str>), ("ADMIN_PORT", None)], || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config.address(), "0.0.0.0:8085");
        });
    }

    #[test]
    fn test_server_config_custom_values() {
        temp_env::with_vars(
            [("ADMIN_HOST", Some("127.0.0.1")), ("ADMIN_PORT", Some("9100"))],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.host, "127.0.0.1");
                assert_eq!(config.port, 9100);
            },
        );
    }

    #[test]
    fn test_server_config_port_out_of_range() {
        temp_env::with_var("ADMIN_PORT", Some("99999"), || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("ADMIN_PORT"));
        });
    }
}
