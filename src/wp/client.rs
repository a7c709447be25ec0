//! Thin WordPress REST API client.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::StartupError;

/// Timeout for requests to the WordPress API. This also bounds every tool
/// forward, since the API call is the only unbounded await in a dispatch.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum WpError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WordPress API returned {status}: {detail}")]
    Api { status: StatusCode, detail: String },

    #[error("invalid endpoint path: {0}")]
    Path(String),
}

/// HTTP client bound to one WordPress site, with optional application
/// password credentials.
#[derive(Clone)]
pub struct WpClient {
    http: Client,
    base: Url,
    credentials: Option<(String, String)>,
}

impl WpClient {
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let mut base = config.api_url.clone();
        // Url::join treats a path without a trailing slash as a file.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StartupError::ClientInit(e.to_string()))?;

        let credentials = match (&config.username, &config.app_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, WpError> {
        self.base
            .join(&format!("wp-json/wp/v2/{path}"))
            .map_err(|e| WpError::Path(e.to_string()))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, WpError> {
        let req = self.http.get(self.endpoint(path)?).query(query);
        Self::into_json(self.authorize(req).send().await?).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, WpError> {
        let req = self.http.post(self.endpoint(path)?).json(body);
        Self::into_json(self.authorize(req).send().await?).await
    }

    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<Value, WpError> {
        let req = self.http.delete(self.endpoint(path)?).query(query);
        Self::into_json(self.authorize(req).send().await?).await
    }

    async fn into_json(resp: reqwest::Response) -> Result<Value, WpError> {
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(WpError::Api { status, detail });
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportMode;

    fn config(url: &str) -> Config {
        Config {
            api_url: Url::parse(url).unwrap(),
            username: None,
            app_password: None,
            api_token: None,
            mode: TransportMode::Stdio,
        }
    }

    #[test]
    fn endpoint_joins_with_and_without_trailing_slash() {
        let client = WpClient::from_config(&config("https://example.com")).unwrap();
        assert_eq!(
            client.endpoint("posts").unwrap().as_str(),
            "https://example.com/wp-json/wp/v2/posts"
        );

        let client = WpClient::from_config(&config("https://example.com/blog")).unwrap();
        assert_eq!(
            client.endpoint("posts/7").unwrap().as_str(),
            "https://example.com/blog/wp-json/wp/v2/posts/7"
        );
    }
}
