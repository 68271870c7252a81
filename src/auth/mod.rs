//! Firebase Authentication.
//!
//! Account lookups go through the Identity Toolkit v1 API. ID tokens minted by
//! the client SDKs are verified locally against Google's secure-token keys.

pub mod keys;
pub mod models;
pub mod verifier;

use crate::app::FirebaseApp;
use crate::auth::models::{DeleteAccountRequest, GetAccountInfoRequest, GetAccountInfoResponse, UserRecord};
use crate::auth::verifier::{FirebaseTokenClaims, IdTokenVerifier, TokenVerificationError};
use crate::core::{build_client, parse_error_response};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
mod tests;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid ID token: {0}")]
    InvalidIdToken(#[from] TokenVerificationError),
}

/// Client for Firebase Authentication, bound to one app.
#[derive(Clone)]
pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    base_url: String,
    verifier: Arc<IdTokenVerifier>,
}

impl std::fmt::Debug for FirebaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseAuth")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl FirebaseAuth {
    /// Creates the client. Usually reached through `FirebaseApp::auth()`.
    pub fn new(app: &FirebaseApp) -> Self {
        let endpoints = app.endpoints();
        let base_url = format!("{}/projects/{}", endpoints.identity_toolkit, app.project_id());
        let verifier = IdTokenVerifier::new(
            app.project_id().to_string(),
            app.http().clone(),
            endpoints.token_keys.clone(),
        );

        Self {
            client: build_client(app.http().clone(), app.auth_middleware()),
            base_url,
            verifier: Arc::new(verifier),
        }
    }

    /// Verifies a Firebase ID token and returns its claims.
    pub async fn verify_id_token(&self, token: &str) -> Result<FirebaseTokenClaims, AuthError> {
        Ok(self.verifier.verify_token(token).await?)
    }

    pub async fn get_user(&self, uid: &str) -> Result<UserRecord, AuthError> {
        let request = GetAccountInfoRequest {
            local_id: Some(vec![uid.to_string()]),
            email: None,
            phone_number: None,
        };
        self.get_account_info(request).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord, AuthError> {
        let request = GetAccountInfoRequest {
            local_id: None,
            email: Some(vec![email.to_string()]),
            phone_number: None,
        };
        self.get_account_info(request).await
    }

    pub async fn get_user_by_phone_number(&self, phone: &str) -> Result<UserRecord, AuthError> {
        let request = GetAccountInfoRequest {
            local_id: None,
            email: None,
            phone_number: Some(vec![phone.to_string()]),
        };
        self.get_account_info(request).await
    }

    pub async fn delete_user(&self, uid: &str) -> Result<(), AuthError> {
        let url = format!("{}/accounts:delete", self.base_url);
        let request = DeleteAccountRequest { local_id: uid.to_string() };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ApiError(parse_error_response(response, "Delete user failed").await));
        }

        debug!(uid, "deleted user");
        Ok(())
    }

    async fn get_account_info(&self, request: GetAccountInfoRequest) -> Result<UserRecord, AuthError> {
        let url = format!("{}/accounts:lookup", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ApiError(parse_error_response(response, "Get user failed").await));
        }

        let result: GetAccountInfoResponse = response.json().await?;

        result
            .users
            .and_then(|mut users| users.pop())
            .ok_or(AuthError::UserNotFound)
    }
}
