//! Firebase Cloud Messaging (FCM) module.
//!
//! Messages go through the FCM HTTP v1 `messages:send` endpoint. Batches are
//! sent as concurrent individual requests and reported in input order.

pub mod models;

use self::models::{BatchResponse, Message, SendResponse, SendResponseInternal};
use crate::app::FirebaseApp;
use crate::core::{build_client_without_retry, parse_error_response};
use futures::stream::{self, StreamExt};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on messages accepted by one `send_each` call.
pub const MAX_BATCH_SIZE: usize = 500;

const SEND_CONCURRENCY: usize = 16;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The message was rejected locally, before any request was made.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

#[derive(Clone)]
pub struct FirebaseMessaging {
    client: ClientWithMiddleware,
    send_url: String,
}

impl std::fmt::Debug for FirebaseMessaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseMessaging")
            .field("send_url", &self.send_url)
            .finish()
    }
}

// Wrapper for the request body required by FCM v1 API
#[derive(Serialize)]
struct SendRequest<'a> {
    validate_only: bool,
    message: &'a Message,
}

impl FirebaseMessaging {
    /// Creates the client. A send is never repeated on its own: FCM may have
    /// delivered the push even when the response was an error.
    pub fn new(app: &FirebaseApp) -> Self {
        Self {
            client: build_client_without_retry(app.http().clone(), app.auth_middleware()),
            send_url: format!(
                "{}/projects/{}/messages:send",
                app.endpoints().fcm.trim_end_matches('/'),
                app.project_id()
            ),
        }
    }

    /// Sends a message and returns the message name assigned by FCM.
    pub async fn send(&self, message: &Message) -> Result<String, MessagingError> {
        validate_message(message)?;
        self.send_request(message, false).await
    }

    /// Validates the message with FCM without delivering it.
    pub async fn send_dry_run(&self, message: &Message) -> Result<String, MessagingError> {
        validate_message(message)?;
        self.send_request(message, true).await
    }

    async fn send_request(&self, message: &Message, dry_run: bool) -> Result<String, MessagingError> {
        let request = SendRequest {
            validate_only: dry_run,
            message,
        };

        let response = self
            .client
            .post(&self.send_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MessagingError::ApiError(
                parse_error_response(response, "FCM send failed").await,
            ));
        }

        let result: SendResponseInternal = response.json().await?;
        debug!(message = %result.name, dry_run, "message sent");
        Ok(result.name)
    }

    /// Sends every message, at most [`MAX_BATCH_SIZE`] of them.
    ///
    /// A failure of one message does not stop the others; it is reported in
    /// the matching entry of `responses`.
    pub async fn send_each(&self, messages: &[Message]) -> Result<BatchResponse, MessagingError> {
        self.send_each_request(messages, false).await
    }

    pub async fn send_each_dry_run(&self, messages: &[Message]) -> Result<BatchResponse, MessagingError> {
        self.send_each_request(messages, true).await
    }

    async fn send_each_request(&self, messages: &[Message], dry_run: bool) -> Result<BatchResponse, MessagingError> {
        if messages.len() > MAX_BATCH_SIZE {
            return Err(MessagingError::InvalidMessage(format!(
                "cannot send more than {} messages in a single batch",
                MAX_BATCH_SIZE
            )));
        }
        for message in messages {
            validate_message(message)?;
        }
        if messages.is_empty() {
            return Ok(BatchResponse::default());
        }

        let responses: Vec<SendResponse> = stream::iter(messages)
            .map(|message| async move {
                match self.send_request(message, dry_run).await {
                    Ok(name) => SendResponse {
                        success: true,
                        message_id: Some(name),
                        error: None,
                    },
                    Err(e) => {
                        warn!(error = %e, "message in batch failed");
                        SendResponse {
                            success: false,
                            message_id: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .buffered(SEND_CONCURRENCY)
            .collect()
            .await;

        let success_count = responses.iter().filter(|r| r.success).count();
        let failure_count = responses.len() - success_count;
        debug!(success_count, failure_count, "batch sent");

        Ok(BatchResponse {
            success_count,
            failure_count,
            responses,
        })
    }

    /// Sends `message` to each registration token.
    ///
    /// The base message must not carry a token, topic or condition of its own.
    pub async fn send_multicast(&self, message: &Message, tokens: &[&str]) -> Result<BatchResponse, MessagingError> {
        self.send_multicast_request(message, tokens, false).await
    }

    pub async fn send_multicast_dry_run(&self, message: &Message, tokens: &[&str]) -> Result<BatchResponse, MessagingError> {
        self.send_multicast_request(message, tokens, true).await
    }

    async fn send_multicast_request(&self, base_message: &Message, tokens: &[&str], dry_run: bool) -> Result<BatchResponse, MessagingError> {
        if base_message.target_count() != 0 {
            return Err(MessagingError::InvalidMessage(
                "multicast base message must not have a target (token, topic, or condition)".to_string(),
            ));
        }

        let messages: Vec<Message> = tokens
            .iter()
            .map(|token| Message {
                token: Some(token.to_string()),
                ..base_message.clone()
            })
            .collect();

        self.send_each_request(&messages, dry_run).await
    }
}

/// Checks that the message names exactly one of token, topic or condition.
pub fn validate_message(message: &Message) -> Result<(), MessagingError> {
    if message.target_count() != 1 {
        return Err(MessagingError::InvalidMessage(
            "message must have exactly one of token, topic, or condition".to_string(),
        ));
    }
    if let Some(topic) = &message.topic {
        if topic.starts_with("/topics/") || topic.is_empty() {
            return Err(MessagingError::InvalidMessage(format!(
                "malformed topic name: {:?}",
                topic
            )));
        }
    }
    Ok(())
}
