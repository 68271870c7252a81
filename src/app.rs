//! The application context every service client is bound to.

use crate::auth::FirebaseAuth;
use crate::config::FirebaseConfig;
use crate::core::middleware::{AuthMiddleware, Credentials};
use crate::firestore::FirebaseFirestore;
use crate::messaging::FirebaseMessaging;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use yup_oauth2::ServiceAccountKey;

pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

const IDENTITY_TOOLKIT_API: &str = "https://identitytoolkit.googleapis.com/v1";
const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";
const FCM_API: &str = "https://fcm.googleapis.com/v1";
const SECURE_TOKEN_JWKS: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("the configuration is missing the project id")]
    ProjectIdMissing,
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Base URLs of the backing services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub identity_toolkit: String,
    pub firestore: String,
    pub fcm: String,
    pub token_keys: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            identity_toolkit: IDENTITY_TOOLKIT_API.to_string(),
            firestore: FIRESTORE_API.to_string(),
            fcm: FCM_API.to_string(),
            token_keys: SECURE_TOKEN_JWKS.to_string(),
        }
    }
}

impl Endpoints {
    /// Production endpoints, redirected to the local emulators when
    /// `FIRESTORE_EMULATOR_HOST` or `FIREBASE_AUTH_EMULATOR_HOST` is set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut endpoints = Self::default();
        if let Some(host) = lookup("FIRESTORE_EMULATOR_HOST").filter(|h| !h.is_empty()) {
            endpoints.firestore = format!("http://{}/v1", host);
        }
        if let Some(host) = lookup("FIREBASE_AUTH_EMULATOR_HOST").filter(|h| !h.is_empty()) {
            endpoints.identity_toolkit = format!("http://{}/identitytoolkit.googleapis.com/v1", host);
        }
        endpoints
    }

    /// Points every service at one base URL. Used against mock servers.
    pub fn with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            identity_toolkit: format!("{}/v1", base_url),
            firestore: format!("{}/v1", base_url),
            fcm: format!("{}/v1", base_url),
            token_keys: format!("{}/jwks", base_url),
        }
    }
}

/// Options that sit next to the configuration record but are not part of it.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Service account used for privileged access. Falls back to the API key.
    pub service_account: Option<ServiceAccountKey>,
    pub endpoints: Endpoints,
}

struct AppInner {
    name: String,
    config: FirebaseConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
    auth: Arc<AuthMiddleware>,
}

/// A configured connection to a Firebase project. Cheap to clone.
#[derive(Clone)]
pub struct FirebaseApp {
    inner: Arc<AppInner>,
}

impl std::fmt::Debug for FirebaseApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseApp")
            .field("name", &self.inner.name)
            .field("project_id", &self.inner.config.project_id)
            .field("credentials", self.inner.auth.credentials())
            .finish()
    }
}

impl FirebaseApp {
    pub fn new(config: FirebaseConfig, options: AppOptions) -> Result<Self, AppError> {
        if config.project_id.is_empty() {
            return Err(AppError::ProjectIdMissing);
        }

        let credentials = match options.service_account {
            Some(key) => Credentials::ServiceAccount(key),
            None => Credentials::ApiKey(config.api_key.clone()),
        };
        let http = reqwest::Client::builder()
            .user_agent(concat!("outliner-firebase/", env!("CARGO_PKG_VERSION")))
            .build()?;

        debug!(project_id = %config.project_id, ?credentials, "initialized firebase app");

        Ok(Self {
            inner: Arc::new(AppInner {
                name: DEFAULT_APP_NAME.to_string(),
                config,
                endpoints: options.endpoints,
                http,
                auth: Arc::new(AuthMiddleware::new(credentials)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.inner.config
    }

    pub fn project_id(&self) -> &str {
        &self.inner.config.project_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn auth_middleware(&self) -> Arc<AuthMiddleware> {
        self.inner.auth.clone()
    }

    pub fn auth(&self) -> FirebaseAuth {
        FirebaseAuth::new(self)
    }

    pub fn firestore(&self) -> FirebaseFirestore {
        FirebaseFirestore::new(self)
    }

    pub fn messaging(&self) -> FirebaseMessaging {
        FirebaseMessaging::new(self)
    }
}
