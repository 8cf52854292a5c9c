//! Session Login
//!
//! A login attempt is a plain page load of the login URL. The host never
//! reports success; it plants cookies instead, so the outcome is read from
//! the cookie jar after the body has been drained.

use async_trait::async_trait;

use super::client::MarketClient;
use super::headers::login_headers;
use crate::application::ports::{AuthError, SessionPort};
use crate::domain::session::AuthState;
use crate::infrastructure::metrics;

/// Auth state for a set of cookie names.
#[must_use]
pub fn compute_auth_state(cookie_names: &[String]) -> AuthState {
    AuthState::from_cookie_names(cookie_names.iter().map(String::as_str))
}

/// Login adapter bound to one worker's session.
#[derive(Clone)]
pub struct SessionAuthenticator {
    client: MarketClient,
}

impl SessionAuthenticator {
    /// Create an authenticator sharing `client`'s cookie jar.
    #[must_use]
    pub const fn new(client: MarketClient) -> Self {
        Self { client }
    }

    /// One login attempt.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RequestFailed` if the request cannot be sent or
    /// the body cannot be read.
    pub async fn attempt(&self) -> Result<AuthState, AuthError> {
        let endpoints = self.client.endpoints();
        let url = endpoints.login_url().clone();
        let headers = login_headers(endpoints, self.client.user_agent())
            .map_err(|e| AuthError::RequestFailed(e.to_string()))?;

        let response = self
            .client
            .http()
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| AuthError::RequestFailed(e.to_string()))?;
        let status = response.status();
        response
            .bytes()
            .await
            .map_err(|e| AuthError::RequestFailed(e.to_string()))?;

        let state = compute_auth_state(&self.client.cookie_names(&url));
        tracing::debug!(%status, auth_state = %state, "Login response");
        Ok(state)
    }
}

#[async_trait]
impl SessionPort for SessionAuthenticator {
    async fn attempt_login(&self) -> Result<AuthState, AuthError> {
        let result = self.attempt().await;
        match &result {
            Ok(state) => metrics::record_login_attempt(state.is_authenticated()),
            Err(_) => metrics::record_login_error(),
        }
        result
    }
}
