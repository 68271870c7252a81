use http::Extensions;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};
use tokio::sync::OnceCell;
use tracing::debug;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

// The type returned by ServiceAccountAuthenticator::builder(...).build().await
type AuthType = Authenticator<HttpsConnector<HttpConnector>>;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/firebase",
    "https://www.googleapis.com/auth/firebase.messaging",
    "https://www.googleapis.com/auth/datastore",
];

/// How outgoing requests prove who they are.
#[derive(Clone)]
pub enum Credentials {
    /// OAuth2 bearer tokens minted from a service account key.
    ServiceAccount(ServiceAccountKey),
    /// The web app's API key, sent as the `key` query parameter.
    ApiKey(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ServiceAccount(key) => f
                .debug_tuple("ServiceAccount")
                .field(&key.client_email)
                .finish(),
            Credentials::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

/// Attaches credentials to every request. One instance is shared by all
/// clients of an app so the OAuth2 authenticator is only built once.
pub struct AuthMiddleware {
    credentials: Credentials,
    authenticator: OnceCell<AuthType>,
}

impl AuthMiddleware {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            authenticator: OnceCell::new(),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn get_token(&self, key: &ServiceAccountKey) -> Result<String, anyhow::Error> {
        let auth = self
            .authenticator
            .get_or_try_init(|| async {
                debug!(client_email = %key.client_email, "building service account authenticator");
                ServiceAccountAuthenticator::builder(key.clone())
                    .build()
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            })
            .await?;

        let token = auth.token(SCOPES).await?;

        Ok(token
            .token()
            .ok_or_else(|| anyhow::anyhow!("No token found"))?
            .to_string())
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let token = self.get_token(key).await.map_err(|e| {
                    reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                        "Failed to get auth token: {}",
                        e
                    ))
                })?;

                let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;
                req.headers_mut().insert(header::AUTHORIZATION, value);
            }
            Credentials::ApiKey(api_key) => {
                req.url_mut().query_pairs_mut().append_pair("key", api_key);
            }
        }

        next.run(req, extensions).await
    }
}
