//! Trade Search
//!
//! Builds the search XHR for a target and runs it through the codec.
//!
//! # Request Body
//!
//! The `query` field carries a JSON keyword filter that is escaped before it
//! is placed in the form, so it ends up escaped twice on the wire:
//!
//! ```text
//! count=20&query=%257B%2522Keywords...&searchtype=T&sortfield=tradeDate&sorttype=2&start=0
//! ```

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::CONTENT_ENCODING;
use url::form_urlencoded;

use super::client::MarketClient;
use super::codec::{decode_response, parse_trades};
use super::headers::search_headers;
use crate::application::ports::{FetchError, TradeFetchPort};
use crate::domain::target::Target;
use crate::domain::trade::FetchOutcome;
use crate::infrastructure::metrics::{self, FetchResult};

/// Rows requested per search.
pub const PAGE_SIZE: &str = "20";

/// Escape a string the way a query component is escaped (`+` for space).
fn query_escape(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// JSON keyword filter for a target.
///
/// Object keys are emitted in sorted order.
#[must_use]
pub fn keyword_filter(target: &Target) -> String {
    serde_json::json!({
        "Keywords": [
            { "Name": "securityId", "Value": target.instrument_id() },
            {
                "Name": "tradeDate",
                "maxValue": target.end_date(),
                "minValue": target.start_date(),
            },
        ]
    })
    .to_string()
}

/// Form-encoded search body for a target.
#[must_use]
pub fn build_search_payload(target: &Target) -> String {
    let query = query_escape(&keyword_filter(target));
    form_urlencoded::Serializer::new(String::new())
        .append_pair("count", PAGE_SIZE)
        .append_pair("query", &query)
        .append_pair("searchtype", "T")
        .append_pair("sortfield", "tradeDate")
        .append_pair("sorttype", "2")
        .append_pair("start", "0")
        .finish()
}

/// Referer of the result page a browser would be on for this search.
#[must_use]
pub fn search_referer(result_page_url: &str, target: &Target) -> String {
    let params = form_urlencoded::Serializer::new(String::new())
        .append_pair("enddate", target.end_date())
        .append_pair("startdate", target.start_date())
        .append_pair("ticker", target.instrument_id())
        .finish();
    format!("{result_page_url}?{}", query_escape(&params))
}

/// Build the search request for a target.
///
/// # Errors
///
/// Returns `FetchError::InvalidRequest` if a header value or the request
/// itself cannot be built.
pub fn build_request(client: &MarketClient, target: &Target) -> Result<reqwest::Request, FetchError> {
    let endpoints = client.endpoints();
    let referer = search_referer(&endpoints.result_page_url(), target);
    let headers = search_headers(endpoints, client.user_agent(), &referer)
        .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

    client
        .http()
        .post(endpoints.search_url().clone())
        .headers(headers)
        .body(build_search_payload(target))
        .build()
        .map_err(|e| FetchError::InvalidRequest(e.to_string()))
}

/// Search adapter bound to one worker's session.
#[derive(Clone)]
pub struct MarketFetcher {
    client: MarketClient,
}

impl MarketFetcher {
    /// Create a fetcher sharing `client`'s cookie jar.
    #[must_use]
    pub const fn new(client: MarketClient) -> Self {
        Self { client }
    }

    async fn execute(&self, target: &Target) -> Result<FetchOutcome, FetchError> {
        let request = build_request(&self.client, target)?;
        let response = self
            .client
            .http()
            .execute(request)
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RequestFailed(format!("status {status}")));
        }

        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let decoded = decode_response(encoding.as_deref(), &body)?;
        parse_trades(&decoded)
    }
}

#[async_trait]
impl TradeFetchPort for MarketFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchOutcome, FetchError> {
        let started = Instant::now();
        let result = self.execute(target).await;

        let label = match &result {
            Ok(FetchOutcome::Trades(_)) => FetchResult::Trades,
            Ok(FetchOutcome::Unauthenticated) => FetchResult::Unauthenticated,
            Err(_) => FetchResult::Error,
        };
        metrics::record_fetch(label, started.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::market::client::ClientConfig;

    fn target() -> Target {
        Target::new("C765371", "05/29/2018", "05/29/2019").unwrap()
    }

    #[test]
    fn keyword_filter_has_sorted_keys() {
        assert_eq!(
            keyword_filter(&target()),
            r#"{"Keywords":[{"Name":"securityId","Value":"C765371"},{"Name":"tradeDate","maxValue":"05/29/2019","minValue":"05/29/2018"}]}"#
        );
    }

    #[test]
    fn payload_is_double_escaped_and_sorted() {
        let payload = build_search_payload(&target());
        let expected_query = "%257B%2522Keywords%2522%253A%255B%257B%2522Name%2522%253A%2522securityId%2522%252C%2522Value%2522%253A%2522C765371%2522%257D%252C%257B%2522Name%2522%253A%2522tradeDate%2522%252C%2522maxValue%2522%253A%252205%252F29%252F2019%2522%252C%2522minValue%2522%253A%252205%252F29%252F2018%2522%257D%255D%257D";
        assert_eq!(
            payload,
            format!(
                "count=20&query={expected_query}&searchtype=T&sortfield=tradeDate&sorttype=2&start=0"
            )
        );
    }

    #[test]
    fn payload_decodes_back_to_filter() {
        let payload = build_search_payload(&target());
        let query = form_urlencoded::parse(payload.as_bytes())
            .find(|(k, _)| k == "query")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let filter: String = form_urlencoded::parse(format!("q={query}").as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(filter, keyword_filter(&target()));
    }

    #[test]
    fn referer_escapes_sorted_params() {
        let referer = search_referer(
            "http://finra-markets.morningstar.com/BondCenter/BondTradeActivitySearchResult.jsp",
            &target(),
        );
        assert_eq!(
            referer,
            "http://finra-markets.morningstar.com/BondCenter/BondTradeActivitySearchResult.jsp?enddate%3D05%252F29%252F2019%26startdate%3D05%252F29%252F2018%26ticker%3DC765371"
        );
    }

    #[test]
    fn request_is_post_with_xhr_headers() {
        let client = MarketClient::new(&ClientConfig {
            host: "finra-markets.morningstar.com".to_string(),
            proxy_port: None,
            timeout: Duration::from_secs(10),
        })
        .unwrap();

        let request = build_request(&client, &target()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "http://finra-markets.morningstar.com/bondSearch.jsp"
        );
        assert_eq!(request.headers()["x-requested-with"], "XMLHttpRequest");
        assert_eq!(
            request.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert!(
            request.headers()["referer"]
                .to_str()
                .unwrap()
                .ends_with("ticker%3DC765371")
        );
    }
}
