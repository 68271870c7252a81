//! Start-up wiring: one configuration record in, four handles out.
//!
//! [`initialize`] creates the application context and then asks it for the
//! auth, database and messaging clients, in that order and once each. The
//! sequence never branches or retries, and the only error it can return is
//! the one the app factory reported.

use crate::app::{AppError, AppOptions, FirebaseApp};
use crate::auth::FirebaseAuth;
use crate::config::FirebaseConfig;
use crate::firestore::FirebaseFirestore;
use crate::messaging::FirebaseMessaging;
use tracing::info;

/// The factories the bootstrap sequence calls.
pub trait Backend {
    type App;
    type Auth;
    type Db;
    type Messaging;
    type Error;

    fn initialize_app(&self, config: &FirebaseConfig) -> Result<Self::App, Self::Error>;
    fn auth(&self, app: &Self::App) -> Self::Auth;
    fn firestore(&self, app: &Self::App) -> Self::Db;
    fn messaging(&self, app: &Self::App) -> Self::Messaging;
}

/// Everything downstream code needs, built from one configuration record.
pub struct Handles<B: Backend> {
    pub app: B::App,
    pub auth: B::Auth,
    pub db: B::Db,
    pub messaging: B::Messaging,
}

impl<B: Backend> std::fmt::Debug for Handles<B>
where
    B::App: std::fmt::Debug,
    B::Auth: std::fmt::Debug,
    B::Db: std::fmt::Debug,
    B::Messaging: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handles")
            .field("app", &self.app)
            .field("auth", &self.auth)
            .field("db", &self.db)
            .field("messaging", &self.messaging)
            .finish()
    }
}

/// Runs the bootstrap sequence against any backend.
pub fn bootstrap<B: Backend>(backend: &B, config: &FirebaseConfig) -> Result<Handles<B>, B::Error> {
    let app = backend.initialize_app(config)?;
    let auth = backend.auth(&app);
    let db = backend.firestore(&app);
    let messaging = backend.messaging(&app);

    Ok(Handles {
        app,
        auth,
        db,
        messaging,
    })
}

/// The REST-backed Firebase client library.
#[derive(Debug, Clone, Default)]
pub struct FirebaseBackend {
    pub options: AppOptions,
}

impl Backend for FirebaseBackend {
    type App = FirebaseApp;
    type Auth = FirebaseAuth;
    type Db = FirebaseFirestore;
    type Messaging = FirebaseMessaging;
    type Error = AppError;

    fn initialize_app(&self, config: &FirebaseConfig) -> Result<FirebaseApp, AppError> {
        FirebaseApp::new(config.clone(), self.options.clone())
    }

    fn auth(&self, app: &FirebaseApp) -> FirebaseAuth {
        app.auth()
    }

    fn firestore(&self, app: &FirebaseApp) -> FirebaseFirestore {
        app.firestore()
    }

    fn messaging(&self, app: &FirebaseApp) -> FirebaseMessaging {
        app.messaging()
    }
}

pub type Firebase = Handles<FirebaseBackend>;

/// Initializes Firebase with production endpoints and API key credentials.
pub fn initialize(config: &FirebaseConfig) -> Result<Firebase, AppError> {
    initialize_with(config, AppOptions::default())
}

/// Initializes Firebase with explicit credentials and endpoints.
pub fn initialize_with(config: &FirebaseConfig, options: AppOptions) -> Result<Firebase, AppError> {
    let handles = bootstrap(&FirebaseBackend { options }, config)?;
    info!(project_id = %handles.app.project_id(), "firebase initialized");
    Ok(handles)
}
