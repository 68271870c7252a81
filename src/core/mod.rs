pub mod middleware;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::sync::Arc;

use self::middleware::AuthMiddleware;

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        match &self.error.status {
            Some(status) => format!("{} (code: {}, status: {})", self.error.message, self.error.code, status),
            None => format!("{} (code: {})", self.error.message, self.error.code),
        }
    }
}

/// Turns a failed response into a readable message, preferring the Google error envelope.
pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<FirebaseErrorResponse>(&text) {
        Ok(error_resp) => format!("{}: {}", default_msg, error_resp.display_message()),
        Err(_) => format!("{} {}: {}", default_msg, status, text),
    }
}

/// Backoff shared by request retries and listen reconnects.
pub(crate) fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff::builder().build_with_max_retries(3)
}

/// Builds the per-service client: transient retries first, then credentials.
pub(crate) fn build_client(http: reqwest::Client, auth: Arc<AuthMiddleware>) -> ClientWithMiddleware {
    ClientBuilder::new(http)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy()))
        .with_arc(auth)
        .build()
}

/// Like [`build_client`] but every request is sent once. For calls that are
/// not idempotent, such as delivering a push.
pub(crate) fn build_client_without_retry(http: reqwest::Client, auth: Arc<AuthMiddleware>) -> ClientWithMiddleware {
    ClientBuilder::new(http).with_arc(auth).build()
}
