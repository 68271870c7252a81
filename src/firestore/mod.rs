//! Cloud Firestore module.
//!
//! This module provides functionality for interacting with Cloud Firestore,
//! including getting references to collections and documents, running queries,
//! and listening for real-time updates.
//!
//! # Real-time Updates
//!
//! `CollectionReference::listen()` and `ExecutableQuery::listen()` open a
//! `documents:listen` stream and return a [`Watch`](listen::Watch), which folds
//! the raw stream into consistent snapshots of added, modified and removed
//! documents. A dropped stream is reopened from the last resume token.

pub mod listen;
pub mod models;
pub mod query;
pub mod reference;
pub mod snapshot;

#[cfg(test)]
mod tests;

use self::query::{ExecutableQuery, Query};
use self::reference::{CollectionReference, DocumentReference};
use crate::app::FirebaseApp;
use crate::core::{build_client, retry_policy};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use thiserror::Error;

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// A document URL could not be built.
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
    /// The server removed the listen target.
    #[error("Listen target removed: {0}")]
    TargetRemoved(String),
    /// The service is temporarily unreachable or a stream broke off.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl FirestoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FirestoreError::RequestError(_) | FirestoreError::MiddlewareError(_) | FirestoreError::Unavailable(_)
        )
    }
}

/// Borrowed view of a client and the database it talks to.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DatabaseRef<'a> {
    pub(crate) client: &'a ClientWithMiddleware,
    /// API root, e.g. `https://firestore.googleapis.com/v1`.
    pub(crate) root: &'a str,
    /// `projects/{p}/databases/(default)`.
    pub(crate) database: &'a str,
    /// Backoff between listen reconnects.
    pub(crate) reconnect: &'a ExponentialBackoff,
}

impl<'a> DatabaseRef<'a> {
    pub(crate) fn url(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }

    pub(crate) fn documents(&self) -> String {
        format!("{}/documents", self.database)
    }

    pub(crate) fn relative_path<'n>(&self, name: &'n str) -> &'n str {
        name.strip_prefix(self.database)
            .and_then(|rest| rest.strip_prefix("/documents/"))
            .unwrap_or(name)
    }
}

/// Client for interacting with Cloud Firestore.
#[derive(Clone)]
pub struct FirebaseFirestore {
    client: ClientWithMiddleware,
    root: String,
    database: String,
    reconnect: ExponentialBackoff,
}

impl std::fmt::Debug for FirebaseFirestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseFirestore")
            .field("root", &self.root)
            .field("database", &self.database)
            .finish()
    }
}

impl FirebaseFirestore {
    /// Creates a new `FirebaseFirestore` instance bound to the app's default database.
    ///
    /// This is typically called via `FirebaseApp::firestore()`.
    pub fn new(app: &FirebaseApp) -> Self {
        Self {
            client: build_client(app.http().clone(), app.auth_middleware()),
            root: app.endpoints().firestore.trim_end_matches('/').to_string(),
            database: format!("projects/{}/databases/(default)", app.project_id()),
            reconnect: retry_policy(),
        }
    }

    /// Replaces the backoff used when a listen stream has to be reopened.
    pub fn with_reconnect_policy(mut self, policy: ExponentialBackoff) -> Self {
        self.reconnect = policy;
        self
    }

    pub(crate) fn db(&self) -> DatabaseRef<'_> {
        DatabaseRef {
            client: &self.client,
            root: &self.root,
            database: &self.database,
            reconnect: &self.reconnect,
        }
    }

    /// The database resource name, `projects/{project_id}/databases/(default)`.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Gets a `CollectionReference` for a root collection.
    ///
    /// # Arguments
    ///
    /// * `collection_id` - The ID of the collection (e.g., "users").
    pub fn collection(&self, collection_id: &str) -> CollectionReference<'_> {
        let db = self.db();
        CollectionReference {
            name: format!("{}/{}", db.documents(), collection_id),
            db,
        }
    }

    /// Gets a `DocumentReference` for the document at the specified path.
    ///
    /// # Arguments
    ///
    /// * `document_path` - The slash-separated path to the document (e.g., "users/user1").
    pub fn doc(&self, document_path: &str) -> DocumentReference<'_> {
        let db = self.db();
        DocumentReference {
            name: format!("{}/{}", db.documents(), document_path.trim_matches('/')),
            db,
        }
    }

    /// Attaches a query definition to this client for execution.
    ///
    /// The query runs against the root collection named in the `Query`.
    pub fn query(&self, query: Query) -> ExecutableQuery<'_> {
        let db = self.db();
        ExecutableQuery::new(db, db.documents(), query)
    }
}
