// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

/// Host provider configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL for hosts, static IPs, credentials and the zone ledger.
    pub database_url: String,
    /// Settings handed to every provider when it builds its vendor client.
    pub client: ClientSettings,
}

/// Vendor client settings.
///
/// Passed explicitly into each provider; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// CA bundle for vendor TLS. `None` means system roots.
    pub ca_certs_path: Option<PathBuf>,
    /// Outbound proxy for vendor calls.
    pub http_proxy: Option<ProxySettings>,
    /// Value of the `origin` tag stamped on vendor resources.
    pub origin_tag: Option<String>,
    /// Whether vendor TLS certificates are verified.
    pub verify_ssl: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ca_certs_path: None,
            http_proxy: None,
            origin_tag: None,
            verify_ssl: true,
        }
    }
}

/// Parsed `scheme://host:port` proxy address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// URL scheme, `http` when omitted.
    pub scheme: String,
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl ProxySettings {
    /// Parse a proxy address such as `http://proxy.local:3128`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = match value.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("http".to_string(), value),
        };

        let (host, port) = rest
            .trim_end_matches('/')
            .rsplit_once(':')
            .ok_or(ConfigError::Invalid(
                "HOST_PROVIDER_HTTP_PROXY",
                "expected scheme://host:port",
            ))?;

        let port = port.parse().map_err(|_| {
            ConfigError::Invalid("HOST_PROVIDER_HTTP_PROXY", "port must be a number")
        })?;

        if host.is_empty() {
            return Err(ConfigError::Invalid(
                "HOST_PROVIDER_HTTP_PROXY",
                "host must not be empty",
            ));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `HOST_PROVIDER_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional:
    /// - `HOST_PROVIDER_CA_CERTS_PATH`: CA bundle; an empty value means system roots
    /// - `HOST_PROVIDER_HTTP_PROXY`: `scheme://host:port`
    /// - `HOST_PROVIDER_ORIGIN_TAG`: origin tag for vendor resources
    /// - `HOST_PROVIDER_VERIFY_SSL`: `false`/`0` disables verification (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("HOST_PROVIDER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("HOST_PROVIDER_DATABASE_URL"))?;

        let ca_certs_path = std::env::var("HOST_PROVIDER_CA_CERTS_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let http_proxy = match std::env::var("HOST_PROVIDER_HTTP_PROXY") {
            Ok(v) if !v.is_empty() => Some(ProxySettings::parse(&v)?),
            _ => None,
        };

        let origin_tag = std::env::var("HOST_PROVIDER_ORIGIN_TAG")
            .ok()
            .filter(|v| !v.is_empty());

        let verify_ssl = std::env::var("HOST_PROVIDER_VERIFY_SSL")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            client: ClientSettings {
                ca_certs_path,
                http_proxy,
                origin_tag,
                verify_ssl,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
