//! Proxied HTTP Client
//!
//! One [`MarketClient`] per worker: a `reqwest` client routed through the
//! worker's SOCKS port, a cookie jar shared by login and search, and the
//! user agent picked for the session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use url::Url;

use super::MarketEndpoints;
use super::headers::random_user_agent;

/// Client construction errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Host does not form valid URLs.
    #[error("invalid market host {host:?}: {source}")]
    InvalidHost {
        /// Configured host.
        host: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// Proxy URL or TLS backend rejected by reqwest.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Market host (`name` or `name:port`).
    pub host: String,
    /// Local SOCKS port; `None` connects directly.
    pub proxy_port: Option<u16>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// SOCKS proxy URL for this config, if proxied.
    ///
    /// Hostnames are resolved by the proxy so lookups leave through the
    /// circuit.
    #[must_use]
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy_port
            .map(|port| format!("socks5h://127.0.0.1:{port}"))
    }
}

/// HTTP session bound to one worker's circuit.
#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    endpoints: Arc<MarketEndpoints>,
    user_agent: &'static str,
}

impl MarketClient {
    /// Build a client with a fresh cookie jar and a random user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is invalid or reqwest rejects the proxy.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let endpoints =
            MarketEndpoints::new(&config.host).map_err(|source| ClientError::InvalidHost {
                host: config.host.clone(),
                source,
            })?;
        let jar = Arc::new(Jar::default());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.timeout);
        if let Some(proxy_url) = config.proxy_url() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            http: builder.build()?,
            jar,
            endpoints: Arc::new(endpoints),
            user_agent: random_user_agent(),
        })
    }

    /// Underlying HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Market endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &MarketEndpoints {
        &self.endpoints
    }

    /// User agent used for every request on this session.
    #[must_use]
    pub const fn user_agent(&self) -> &'static str {
        self.user_agent
    }

    /// Names of the cookies the jar would send to `url`.
    #[must_use]
    pub fn cookie_names(&self, url: &Url) -> Vec<String> {
        self.jar
            .cookies(url)
            .and_then(|header| header.to_str().map(cookie_names_from_header).ok())
            .unwrap_or_default()
    }
}

/// Split a `Cookie` request header (`a=1; b=2`) into cookie names.
fn cookie_names_from_header(header: &str) -> Vec<String> {
    header
        .split(';')
        .filter_map(|pair| pair.split('=').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(proxy_port: Option<u16>) -> ClientConfig {
        ClientConfig {
            host: "finra-markets.morningstar.com".to_string(),
            proxy_port,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn proxy_url_targets_local_socks_port() {
        assert_eq!(
            config(Some(9051)).proxy_url().as_deref(),
            Some("socks5h://127.0.0.1:9051")
        );
        assert_eq!(config(None).proxy_url(), None);
    }

    #[test]
    fn cookie_header_is_split_into_names() {
        assert_eq!(
            cookie_names_from_header("SessionID=abc; UsrID=1;Instid=x=y"),
            vec!["SessionID", "UsrID", "Instid"]
        );
        assert!(cookie_names_from_header("").is_empty());
    }

    #[test]
    fn jar_cookies_are_visible_by_name() {
        let client = MarketClient::new(&config(None)).unwrap();
        let url = client.endpoints().login_url().clone();
        client.jar.add_cookie_str("SessionID=abc; Path=/", &url);
        client.jar.add_cookie_str("UsrName=bob; Path=/", &url);

        let mut names = client.cookie_names(&url);
        names.sort();
        assert_eq!(names, vec!["SessionID", "UsrName"]);
    }

    #[test]
    fn invalid_host_is_reported() {
        let err = MarketClient::new(&ClientConfig {
            host: "bad host".to_string(),
            ..config(None)
        })
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::InvalidHost { .. }));
    }
}
