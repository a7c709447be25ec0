//! Environment configuration.
//!
//! The transport mode is selected by the environment: if `MCP_PORT` or
//! `PORT` is set the server runs the HTTP binding on that port, otherwise
//! it runs on stdio. `WORDPRESS_API_URL` is required; missing it is a fatal
//! startup error.

use crate::error::StartupError;
use url::Url;

/// Which transport binding the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http(u16),
}

/// Process configuration resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the WordPress site (e.g. `https://example.com`).
    pub api_url: Url,
    /// Application-password credentials for the WordPress REST API.
    pub username: Option<String>,
    pub app_password: Option<String>,
    /// Bearer token for the HTTP auth gate. `None` means the gate is
    /// disabled; an empty string is a configured (if unusable) token.
    pub api_token: Option<String>,
    pub mode: TransportMode,
}

impl Config {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let raw_url = get("WORDPRESS_API_URL").ok_or(StartupError::MissingEnv("WORDPRESS_API_URL"))?;
        let api_url = Url::parse(raw_url.trim()).map_err(|e| StartupError::InvalidEnv {
            name: "WORDPRESS_API_URL",
            detail: e.to_string(),
        })?;

        // MCP_PORT wins over PORT when both are present.
        let mode = match get("MCP_PORT").or_else(|| get("PORT")) {
            Some(raw) => {
                let port = raw.trim().parse::<u16>().map_err(|e| StartupError::InvalidEnv {
                    name: "MCP_PORT/PORT",
                    detail: e.to_string(),
                })?;
                TransportMode::Http(port)
            }
            None => TransportMode::Stdio,
        };

        Ok(Self {
            api_url,
            username: get("WORDPRESS_USERNAME"),
            app_password: get("WORDPRESS_APP_PASSWORD"),
            api_token: get("MCP_API_TOKEN"),
            mode,
        })
    }
}
