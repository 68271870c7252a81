//! Firebase bootstrap for the Outliner backend.
//!
//! A [`FirebaseConfig`] loaded from the environment or a JSON file is turned
//! into an application context plus Auth, Firestore and Cloud Messaging
//! handles by [`initialize`]. The [`notify`] module builds the mention and
//! follower push notifier on top of those handles.

pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod firestore;
pub mod messaging;
pub mod notify;

pub use app::{AppError, AppOptions, Endpoints, FirebaseApp};
pub use auth::FirebaseAuth;
pub use bootstrap::{bootstrap, initialize, initialize_with, Backend, Firebase, FirebaseBackend, Handles};
pub use config::{ConfigError, FirebaseConfig};
pub use firestore::FirebaseFirestore;
pub use messaging::FirebaseMessaging;
