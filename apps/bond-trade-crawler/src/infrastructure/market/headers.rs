//! Browser Header Sets
//!
//! The market host only answers requests that look like a desktop browser.
//! Login and search use fixed header sets; the user agent is picked once per
//! worker and reused for every request on that worker's session.

use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HOST,
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, REFERER, USER_AGENT,
};

use super::MarketEndpoints;

/// Desktop browser user agents.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/74.0.3729.169 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:67.0) Gecko/20100101 Firefox/67.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/12.1.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.14; rv:67.0) Gecko/20100101 Firefox/67.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/74.0.3729.169 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:67.0) Gecko/20100101 Firefox/67.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.102 Safari/537.36 Edge/18.18362",
    "Mozilla/5.0 (Windows NT 6.1; Win64; x64; rv:60.0) Gecko/20100101 Firefox/60.0",
];

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const XHR_ACCEPT: &str = "text/plain, */*; q=0.01";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Pick a user agent at random.
#[must_use]
pub fn random_user_agent() -> &'static str {
    use rand::seq::IndexedRandom;

    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Headers shared by login and search.
fn common_headers(
    endpoints: &MarketEndpoints,
    user_agent: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(HOST, HeaderValue::from_str(endpoints.host())?);
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache,no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(headers)
}

/// Header set for the login page request.
///
/// # Errors
///
/// Returns an error if the host or user agent is not a valid header value.
pub fn login_headers(
    endpoints: &MarketEndpoints,
    user_agent: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = common_headers(endpoints, user_agent)?;
    headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
    headers.insert(REFERER, HeaderValue::from_str(endpoints.login_url().as_str())?);
    Ok(headers)
}

/// Header set for a search XHR.
///
/// # Errors
///
/// Returns an error if the host, user agent or referer is not a valid
/// header value.
pub fn search_headers(
    endpoints: &MarketEndpoints,
    user_agent: &str,
    referer: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = common_headers(endpoints, user_agent)?;
    headers.insert(ACCEPT, HeaderValue::from_static(XHR_ACCEPT));
    headers.insert(X_REQUESTED_WITH, HeaderValue::from_static("XMLHttpRequest"));
    headers.insert(REFERER, HeaderValue::from_str(referer)?);
    Ok(headers)
}
