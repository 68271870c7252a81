//! Push notifications for mentions and new followers.
//!
//! The notifier watches the `posts` and `follows` collections. Documents
//! that already exist when a watch starts are ignored; each document added
//! afterwards triggers at most one multicast per recipient.

pub mod mentions;

pub use self::mentions::extract_mentions;

use crate::firestore::models::FieldOperator;
use crate::firestore::snapshot::ChangeKind;
use crate::firestore::{FirebaseFirestore, FirestoreError};
use crate::messaging::models::{BatchResponse, Message};
use crate::messaging::{FirebaseMessaging, MessagingError, MAX_BATCH_SIZE};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const POSTS: &str = "posts";
pub const FOLLOWS: &str = "follows";
pub const USERS: &str = "users";

pub const MENTION_TITLE: &str = "New Mention";
pub const FOLLOWER_TITLE: &str = "New Follower";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("user not found: {0}")]
    UserNotFound(String),
}

/// A document in `posts`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub content: String,
    pub user_id: String,
}

/// A document in `follows`: `follower_id` now follows `following_id`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub follower_id: String,
    pub following_id: String,
}

/// The fields of a `users` document the notifier reads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub device_tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Posts,
    Follows,
}

impl Feed {
    fn collection(self) -> &'static str {
        match self {
            Feed::Posts => POSTS,
            Feed::Follows => FOLLOWS,
        }
    }
}

pub struct Notifier<'a> {
    db: &'a FirebaseFirestore,
    messaging: &'a FirebaseMessaging,
}

impl<'a> Notifier<'a> {
    pub fn new(db: &'a FirebaseFirestore, messaging: &'a FirebaseMessaging) -> Self {
        Self { db, messaging }
    }

    /// Watches posts and follows until both watches end.
    ///
    /// A watch that fails is logged and not restarted.
    pub async fn run(&self) {
        let (posts, follows) = tokio::join!(self.watch(Feed::Posts), self.watch(Feed::Follows));

        for (feed, result) in [(Feed::Posts, posts), (Feed::Follows, follows)] {
            match result {
                Ok(()) => info!(collection = feed.collection(), "watch closed"),
                Err(e) => error!(collection = feed.collection(), error = %e, "watch failed"),
            }
        }
    }

    async fn watch(&self, feed: Feed) -> Result<(), NotifyError> {
        let collection = feed.collection();
        let mut watch = self.db.collection(collection).listen().await?;
        info!(collection, "listening for changes");

        let mut initial = true;
        while let Some(snapshot) = watch.next_snapshot().await {
            let snapshot = snapshot?;
            if initial {
                initial = false;
                debug!(collection, size = snapshot.size, "skipping initial snapshot");
                continue;
            }

            for change in snapshot.changes_of(ChangeKind::Added) {
                let result = match feed {
                    Feed::Posts => match change.data::<Post>() {
                        Ok(post) => self.notify_mentions(&post).await,
                        Err(e) => Err(e.into()),
                    },
                    Feed::Follows => match change.data::<Follow>() {
                        Ok(follow) => self.notify_follow(&follow).await,
                        Err(e) => Err(e.into()),
                    },
                };
                if let Err(e) = result {
                    warn!(collection, document = change.id(), error = %e, "skipping document");
                }
            }
        }

        Ok(())
    }

    /// Notifies every existing user mentioned in `post`.
    ///
    /// A mention of an unknown user, or a failed lookup or send for one
    /// mention, does not stop the others.
    pub async fn notify_mentions(&self, post: &Post) -> Result<(), NotifyError> {
        let sender = self.user(&post.user_id).await?;
        let body = format!("New Mention from {}: {}", sender.username, post.content);

        for username in extract_mentions(&post.content) {
            let recipient = match self.user_by_username(username).await {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    debug!(username, "mentioned user does not exist");
                    continue;
                }
                Err(e) => {
                    warn!(username, error = %e, "error fetching mentioned user");
                    continue;
                }
            };

            if let Err(e) = self.send(MENTION_TITLE, &body, &recipient.device_tokens).await {
                warn!(username, error = %e, "failed to send mention notification");
            }
        }

        Ok(())
    }

    /// Tells the followed user who started following them.
    pub async fn notify_follow(&self, follow: &Follow) -> Result<(), NotifyError> {
        let follower = self.user(&follow.follower_id).await?;
        let recipient = self.user(&follow.following_id).await?;

        let body = format!("You have a new follower: {}", follower.username);
        self.send(FOLLOWER_TITLE, &body, &recipient.device_tokens).await?;
        Ok(())
    }

    async fn user(&self, id: &str) -> Result<UserProfile, NotifyError> {
        self.db
            .collection(USERS)
            .doc(id)
            .get::<UserProfile>()
            .await?
            .ok_or_else(|| NotifyError::UserNotFound(id.to_string()))
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserProfile>, NotifyError> {
        let snapshot = self
            .db
            .collection(USERS)
            .query()
            .where_filter("username", FieldOperator::Equal, username)?
            .limit(1)
            .get()
            .await?;

        match snapshot.documents().first() {
            Some(doc) => Ok(doc.data::<UserProfile>()?),
            None => Ok(None),
        }
    }

    /// Multicasts a notification to `tokens`, in batches FCM accepts.
    ///
    /// Returns `None` without calling FCM when there are no tokens.
    async fn send(&self, title: &str, body: &str, tokens: &[String]) -> Result<Option<BatchResponse>, NotifyError> {
        if tokens.is_empty() {
            debug!(title, "recipient has no device tokens");
            return Ok(None);
        }

        let message = Message::notification(title, body);
        let mut total = BatchResponse::default();
        for chunk in tokens.chunks(MAX_BATCH_SIZE) {
            let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
            let response = self.messaging.send_multicast(&message, &chunk).await?;
            total.success_count += response.success_count;
            total.failure_count += response.failure_count;
            total.responses.extend(response.responses);
        }

        info!(
            title,
            success_count = total.success_count,
            failure_count = total.failure_count,
            "notification sent"
        );
        Ok(Some(total))
    }
}
