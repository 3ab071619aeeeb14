mod defaults;

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;

use defaults::*;
use serde::{Deserialize, Serialize};

use crate::{ListenEndpoint, Secret};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "_default_http_listen")]
    pub listen: ListenEndpoint,

    #[serde(default)]
    pub external_host: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: _default_http_listen(),
            external_host: None,
        }
    }
}

/// Tuning knobs for the security control plane. The defaults reproduce the
/// production values; the authenticated API limit is always double the
/// unauthenticated one.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "_default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default = "_default_api_limit_unauthenticated")]
    pub api_limit_unauthenticated: u32,

    #[serde(default = "_default_api_limit_authenticated")]
    pub api_limit_authenticated: u32,

    #[serde(default = "_default_api_window", with = "humantime_serde")]
    pub api_window: Duration,

    #[serde(default = "_default_login_max_attempts")]
    pub login_max_attempts: u32,

    #[serde(default = "_default_login_window", with = "humantime_serde")]
    pub login_window: Duration,

    #[serde(default = "_default_login_block_duration", with = "humantime_serde")]
    pub login_block_duration: Duration,

    #[serde(default = "_default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,

    #[serde(default = "_default_security_log_path")]
    pub security_log_path: String,

    #[serde(default = "_default_security_log_max_bytes")]
    pub security_log_max_bytes: u64,

    #[serde(default = "_default_security_log_generations")]
    pub security_log_generations: usize,

    #[serde(default = "_default_maintenance_interval", with = "humantime_serde")]
    pub maintenance_interval: Duration,

    #[serde(default = "_default_reputation_retention", with = "humantime_serde")]
    pub reputation_retention: Duration,

    #[serde(default = "_default_audit_retention", with = "humantime_serde")]
    pub audit_retention: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        #[allow(clippy::unwrap_used)]
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LabgateConfig {
    #[serde(default = "_default_database_url")]
    pub database_url: Secret<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(skip, default)]
    pub paths_relative_to: PathBuf,
}

impl Default for LabgateConfig {
    fn default() -> Self {
        Self {
            database_url: _default_database_url(),
            http: HttpConfig::default(),
            security: SecurityConfig::default(),
            paths_relative_to: PathBuf::default(),
        }
    }
}

impl LabgateConfig {
    /// Validation performed by `labgate check` before starting the server.
    pub fn validate(&self) -> Result<(), String> {
        if self.security.api_limit_authenticated != self.security.api_limit_unauthenticated * 2 {
            return Err(format!(
                "api_limit_authenticated ({}) must be double api_limit_unauthenticated ({})",
                self.security.api_limit_authenticated, self.security.api_limit_unauthenticated
            ));
        }
        if self.security.api_window.as_secs() == 0 {
            return Err("api_window must be non-zero".into());
        }
        if self.security.login_max_attempts == 0 {
            return Err("login_max_attempts must be non-zero".into());
        }
        if let Some(host) = &self.http.external_host {
            if (host.as_str(), 0).to_socket_addrs().is_err() {
                return Err(format!("external_host {host} does not resolve"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LabgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.security.api_limit_unauthenticated, 60);
        assert_eq!(config.security.api_limit_authenticated, 120);
        assert_eq!(config.security.api_window, Duration::from_secs(60));
        assert_eq!(config.security.login_max_attempts, 5);
        assert_eq!(config.security.max_payload_bytes, 1048576);
    }

    #[test]
    fn test_ratio_validation() {
        let mut config = LabgateConfig::default();
        config.security.api_limit_authenticated = 100;
        assert!(config.validate().is_err());
    }
}
