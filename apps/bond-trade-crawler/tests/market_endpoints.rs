//! Market Endpoint Integration Tests
//!
//! Runs the login and search adapters against a local mock host, without
//! a proxy in between.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use wiremock::matchers::{body_string_contains, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bond_trade_crawler::{
    AuthState, ClientConfig, FetchError, FetchOutcome, MarketClient, MarketFetcher,
    SessionAuthenticator, SessionPort, Target, TradeFetchPort,
};

const TRADES: &str = r#"{T:{"Columns":[{"tradeQuantity":"1MM+","securityID":"C765371","price":99.25,"tradeDate":"05/28/2019","timeOfExecution":"15:42:10"},{"tradeQuantity":"50","securityID":"C765371","price":98.875,"tradeDate":"05/28/2019","timeOfExecution":"09:31:55"}],"Rows":2}}"#;

fn client_for(server: &MockServer) -> MarketClient {
    MarketClient::new(&ClientConfig {
        host: server.address().to_string(),
        proxy_port: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn target() -> Target {
    Target::new("C765371", "05/29/2018", "05/29/2019").unwrap()
}

fn login_response(cookies: &[(&str, &str)]) -> ResponseTemplate {
    cookies.iter().fold(
        ResponseTemplate::new(200).set_body_string("<html></html>"),
        |response, (name, value)| {
            response.append_header("set-cookie", format!("{name}={value}; Path=/"))
        },
    )
}

fn all_cookies() -> Vec<(&'static str, &'static str)> {
    AuthState::COOKIES
        .iter()
        .map(|(name, _)| (*name, "v"))
        .collect()
}

fn gzip(body: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn login_with_every_cookie_is_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/finralogin.jsp"))
        .respond_with(login_response(&all_cookies()))
        .expect(1)
        .mount(&server)
        .await;

    let auth = SessionAuthenticator::new(client_for(&server));
    let state = auth.attempt_login().await.unwrap();

    assert!(state.is_authenticated());
    assert_eq!(state, AuthState::AUTHENTICATED);
}

#[tokio::test]
async fn login_missing_cookies_is_not_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/finralogin.jsp"))
        .respond_with(login_response(&[("__cfduid", "a"), ("SessionID", "b")]))
        .mount(&server)
        .await;

    let auth = SessionAuthenticator::new(client_for(&server));
    let state = auth.attempt_login().await.unwrap();

    assert!(!state.is_authenticated());
    assert!(state.contains(AuthState::EDGE_ID));
    assert!(state.contains(AuthState::SESSION_ID));
    assert_eq!(state.missing_cookies().len(), 5);
}

#[tokio::test]
async fn login_status_is_ignored_when_cookies_arrive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/finralogin.jsp"))
        .respond_with(
            all_cookies()
                .iter()
                .fold(ResponseTemplate::new(503), |response, (name, value)| {
                    response.append_header("set-cookie", format!("{name}={value}; Path=/"))
                }),
        )
        .mount(&server)
        .await;

    let auth = SessionAuthenticator::new(client_for(&server));
    assert!(auth.attempt_login().await.unwrap().is_authenticated());
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn search_after_login_sends_cookies_and_decodes_gzip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/finralogin.jsp"))
        .respond_with(login_response(&all_cookies()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bondSearch.jsp"))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .and(header_regex("cookie", "SessionID=v"))
        .and(body_string_contains("searchtype=T"))
        .and(body_string_contains("C765371"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(gzip(TRADES)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let auth = SessionAuthenticator::new(client.clone());
    let fetcher = MarketFetcher::new(client);

    assert!(auth.attempt_login().await.unwrap().is_authenticated());
    let outcome = fetcher.fetch(&target()).await.unwrap();

    let FetchOutcome::Trades(trades) = outcome else {
        panic!("expected trades, got {outcome:?}");
    };
    assert_eq!(trades.len(), 2);
    assert_eq!(
        trades[0].to_string(),
        "05/28/2019 [15:42:10] C765371 99.250 1MM+"
    );
    assert_eq!(trades[1].quantity, "50");
}

#[tokio::test]
async fn empty_search_response_means_session_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bondSearch.jsp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let fetcher = MarketFetcher::new(client_for(&server));
    assert_eq!(
        fetcher.fetch(&target()).await.unwrap(),
        FetchOutcome::Unauthenticated
    );
}

#[tokio::test]
async fn error_status_is_a_request_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bondSearch.jsp"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let fetcher = MarketFetcher::new(client_for(&server));
    assert!(matches!(
        fetcher.fetch(&target()).await,
        Err(FetchError::RequestFailed(_))
    ));
}

#[tokio::test]
async fn html_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bondSearch.jsp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let fetcher = MarketFetcher::new(client_for(&server));
    assert!(matches!(
        fetcher.fetch(&target()).await,
        Err(FetchError::MalformedPayload(_))
    ));
}
