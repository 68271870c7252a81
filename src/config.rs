//! Project configuration.
//!
//! The record has the same shape as the `firebaseConfig` object handed out by
//! the Firebase console for a web app, so it can be loaded from that JSON as is
//! or from `FIREBASE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a [`FirebaseConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON or lacks a field.
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifies the Firebase project and web app the handles are bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_id: Option<String>,
}

pub const ENV_API_KEY: &str = "FIREBASE_API_KEY";
pub const ENV_AUTH_DOMAIN: &str = "FIREBASE_AUTH_DOMAIN";
pub const ENV_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
pub const ENV_STORAGE_BUCKET: &str = "FIREBASE_STORAGE_BUCKET";
pub const ENV_MESSAGING_SENDER_ID: &str = "FIREBASE_MESSAGING_SENDER_ID";
pub const ENV_APP_ID: &str = "FIREBASE_APP_ID";
pub const ENV_MEASUREMENT_ID: &str = "FIREBASE_MEASUREMENT_ID";

impl FirebaseConfig {
    /// Reads the configuration from `FIREBASE_*` environment variables.
    ///
    /// `FIREBASE_MEASUREMENT_ID` is optional, every other variable is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration from a JSON file in the web SDK's `firebaseConfig` shape.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        Ok(Self {
            api_key: required(ENV_API_KEY)?,
            auth_domain: required(ENV_AUTH_DOMAIN)?,
            project_id: required(ENV_PROJECT_ID)?,
            storage_bucket: required(ENV_STORAGE_BUCKET)?,
            messaging_sender_id: required(ENV_MESSAGING_SENDER_ID)?,
            app_id: required(ENV_APP_ID)?,
            measurement_id: lookup(ENV_MEASUREMENT_ID).filter(|v| !v.is_empty()),
        })
    }
}
