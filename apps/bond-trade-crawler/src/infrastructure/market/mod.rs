//! Market Data Host Adapters
//!
//! HTTP adapters for the bond trade search site:
//!
//! - **Login**: page load that plants the session cookies
//! - **Search**: form-encoded XHR returning a JSON-ish trade block
//!
//! Both flows of one worker share a [`MarketClient`] (proxy transport and
//! cookie jar).

pub mod auth;
pub mod client;
pub mod codec;
pub mod headers;
pub mod search;

pub use auth::{SessionAuthenticator, compute_auth_state};
pub use client::{ClientConfig, ClientError, MarketClient};
pub use codec::{decode_response, parse_trades, repair_payload};
pub use search::{MarketFetcher, build_request, build_search_payload, search_referer};

use url::Url;

/// Login page path.
pub const LOGIN_PATH: &str = "/finralogin.jsp";

/// Search endpoint path.
pub const SEARCH_PATH: &str = "/bondSearch.jsp";

/// Search result page path, used in the referer.
pub const RESULT_PAGE_PATH: &str = "/BondCenter/BondTradeActivitySearchResult.jsp";

/// URLs of the market host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEndpoints {
    host: String,
    login_url: Url,
    search_url: Url,
}

impl MarketEndpoints {
    /// Build endpoints for `host` (`name` or `name:port`, plain HTTP).
    ///
    /// # Errors
    ///
    /// Returns an error if `host` does not form a valid URL.
    pub fn new(host: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(&format!("http://{host}"))?;
        Ok(Self {
            host: host.to_string(),
            login_url: base.join(LOGIN_PATH)?,
            search_url: base.join(SEARCH_PATH)?,
        })
    }

    /// Host header value.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Login page URL.
    #[must_use]
    pub const fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Search endpoint URL.
    #[must_use]
    pub const fn search_url(&self) -> &Url {
        &self.search_url
    }

    /// Search result page URL without query.
    #[must_use]
    pub fn result_page_url(&self) -> String {
        format!("http://{}{RESULT_PAGE_PATH}", self.host)
    }
}
