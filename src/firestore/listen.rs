use super::models::{Document, ListenRequest, ListenResponse, TargetChangeType};
use super::snapshot::{ChangeKind, DocumentChange, WatchSnapshot};
use super::{DatabaseRef, FirestoreError};
use crate::core::parse_error_response;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{RetryDecision, RetryPolicy};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Target id used for the single target a watch registers.
pub(crate) const WATCH_TARGET_ID: i32 = 1;

/// A stream of `ListenResponse` messages.
///
/// The listen endpoint answers with one long JSON array; each element is
/// yielded as soon as it is complete.
pub struct ListenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
}

impl ListenStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // 1. Drop array punctuation between elements, then try to cut one object.
            let skip = leading_separators(&self.buffer);
            self.buffer.advance(skip);

            if let Some(len) = find_json_boundary(&self.buffer) {
                let bytes = self.buffer.split_to(len);
                return match serde_json::from_slice::<ListenResponse>(&bytes) {
                    Ok(msg) => Poll::Ready(Some(Ok(msg))),
                    Err(e) => Poll::Ready(Some(Err(FirestoreError::SerializationError(e)))),
                };
            }

            // 2. If no complete object, poll the underlying stream for more bytes.
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FirestoreError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(FirestoreError::Unavailable(
                            "Stream ended with incomplete JSON".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn leading_separators(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b','))
        .count()
}

/// Finds the length of the JSON object at the start of the buffer.
fn find_json_boundary(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

async fn open_listen(
    client: &ClientWithMiddleware,
    url: &str,
    request: &ListenRequest,
) -> Result<ListenStream, FirestoreError> {
    let response = client.post(url).json(request).send().await?;

    let status = response.status();
    if !status.is_success() {
        let message = parse_error_response(response, "Listen failed").await;
        return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            FirestoreError::Unavailable(message)
        } else {
            FirestoreError::ApiError(message)
        });
    }

    debug!(
        database = %request.database,
        target_id = request.add_target.target_id,
        resumed = request.add_target.resume_token.is_some(),
        "listen stream opened"
    );

    Ok(ListenStream::new(Box::pin(response.bytes_stream())))
}

/// Folds the raw listen protocol into consistent snapshots.
#[derive(Debug)]
pub(crate) struct WatchState {
    target_id: i32,
    current: bool,
    emitted: bool,
    /// Documents as of the last emitted snapshot.
    committed: HashMap<String, Document>,
    /// Documents as the server has described them so far.
    docs: HashMap<String, Document>,
    /// Names touched since the last snapshot, in first-touch order.
    touched: Vec<String>,
    touched_set: HashSet<String>,
    resume_token: Option<String>,
    /// Set when the target has to be listened to again from scratch.
    relisten: bool,
}

impl WatchState {
    pub(crate) fn new(target_id: i32) -> Self {
        Self {
            target_id,
            current: false,
            emitted: false,
            committed: HashMap::new(),
            docs: HashMap::new(),
            touched: Vec::new(),
            touched_set: HashSet::new(),
            resume_token: None,
            relisten: false,
        }
    }

    fn touch(&mut self, name: &str) {
        if self.touched_set.insert(name.to_string()) {
            self.touched.push(name.to_string());
        }
    }

    fn concerns_us(&self, target_ids: &[i32]) -> bool {
        target_ids.is_empty() || target_ids.contains(&self.target_id)
    }

    pub(crate) fn apply(&mut self, message: ListenResponse) -> Result<Option<WatchSnapshot>, FirestoreError> {
        if let Some(change) = message.target_change {
            if change.resume_token.is_some() {
                self.resume_token = change.resume_token.clone();
            }
            match change.target_change_type {
                TargetChangeType::NoChange => {
                    if change.target_ids.is_empty() && self.current {
                        return Ok(self.emit(change.read_time));
                    }
                }
                TargetChangeType::Add => {}
                TargetChangeType::Current => {
                    if self.concerns_us(&change.target_ids) {
                        self.current = true;
                    }
                }
                TargetChangeType::Reset => {
                    if self.concerns_us(&change.target_ids) {
                        self.reset();
                    }
                }
                TargetChangeType::Remove => {
                    if self.concerns_us(&change.target_ids) {
                        let cause = change
                            .cause
                            .map(|s| format!("{} (code: {})", s.message, s.code))
                            .unwrap_or_else(|| "no cause given".to_string());
                        return Err(FirestoreError::TargetRemoved(cause));
                    }
                }
            }
        } else if let Some(change) = message.document_change {
            let name = change.document.name.clone();
            if change.target_ids.contains(&self.target_id) {
                self.docs.insert(name.clone(), change.document);
                self.touch(&name);
            } else if change.removed_target_ids.contains(&self.target_id) {
                self.docs.remove(&name);
                self.touch(&name);
            }
        } else if let Some(delete) = message.document_delete {
            self.docs.remove(&delete.document);
            self.touch(&delete.document);
        } else if let Some(remove) = message.document_remove {
            self.docs.remove(&remove.document);
            self.touch(&remove.document);
        } else if let Some(filter) = message.filter {
            if filter.target_id == self.target_id && filter.count as usize != self.docs.len() {
                warn!(
                    expected = filter.count,
                    actual = self.docs.len(),
                    "existence filter mismatch, listening again"
                );
                self.reset();
                self.resume_token = None;
                self.relisten = true;
            }
        }

        Ok(None)
    }

    /// Forgets the server's view; the full result set will be sent again and
    /// diffed against the last snapshot.
    fn reset(&mut self) {
        let names: Vec<String> = self.docs.keys().cloned().collect();
        for name in &names {
            self.touch(name);
        }
        self.docs.clear();
        self.current = false;
    }

    /// Prepares for a new stream on the same target.
    fn reopen(&mut self) {
        self.current = false;
        self.relisten = false;
    }

    fn emit(&mut self, read_time: Option<String>) -> Option<WatchSnapshot> {
        if self.emitted && self.touched.is_empty() {
            return None;
        }

        let mut changes = Vec::new();
        for name in self.touched.drain(..) {
            let change = match (self.committed.get(&name), self.docs.get(&name)) {
                (None, Some(doc)) => Some((ChangeKind::Added, doc.clone())),
                (Some(old), None) => Some((ChangeKind::Removed, old.clone())),
                (Some(old), Some(doc)) if old != doc => Some((ChangeKind::Modified, doc.clone())),
                _ => None,
            };
            if let Some((kind, document)) = change {
                changes.push(DocumentChange { kind, document });
            }
        }
        self.touched_set.clear();
        self.committed = self.docs.clone();

        // Documents resent after a reconnect or reset that did not change.
        if self.emitted && changes.is_empty() {
            return None;
        }
        self.emitted = true;

        Some(WatchSnapshot {
            changes,
            read_time,
            size: self.docs.len(),
        })
    }
}

/// A live watch over a query or collection.
///
/// When the stream ends or breaks off, the watch listens again from the last
/// resume token, backing off between attempts. The attempt count starts over
/// whenever the server hands out a new token.
pub struct Watch {
    client: ClientWithMiddleware,
    url: String,
    request: ListenRequest,
    policy: ExponentialBackoff,
    stream: ListenStream,
    state: WatchState,
    /// Reconnects since the resume token last moved.
    attempts: u32,
    /// Resume token the current stream was opened with.
    opened_with: Option<String>,
}

impl Watch {
    /// Opens the first stream. Failing here is returned as is, without retries.
    pub(crate) async fn open(db: DatabaseRef<'_>, request: ListenRequest) -> Result<Self, FirestoreError> {
        let url = format!("{}:listen", db.url(&db.documents()));
        let stream = open_listen(db.client, &url, &request).await?;

        Ok(Self {
            client: db.client.clone(),
            url,
            policy: db.reconnect.clone(),
            stream,
            state: WatchState::new(request.add_target.target_id),
            attempts: 0,
            opened_with: request.add_target.resume_token.clone(),
            request,
        })
    }

    /// The latest resume token reported by the server.
    pub fn resume_token(&self) -> Option<&str> {
        self.state.resume_token.as_deref()
    }

    /// Waits for the next consistent snapshot.
    ///
    /// The first snapshot holds every matching document as `Added`. Returns
    /// `None` once the server keeps closing the stream and the reconnect
    /// policy gives up, or an error if the target was removed, the listen was
    /// rejected, or the last reconnect failed.
    pub async fn next_snapshot(&mut self) -> Option<Result<WatchSnapshot, FirestoreError>> {
        loop {
            let cause = match self.stream.next().await {
                Some(Ok(message)) => match self.state.apply(message) {
                    Ok(Some(snapshot)) => return Some(Ok(snapshot)),
                    Ok(None) if self.state.relisten => None,
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(e)) if e.is_transient() => Some(e),
                Some(Err(e)) => return Some(Err(e)),
                None => None,
            };

            match self.reconnect(cause).await {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Replaces the stream, resuming from the latest token. `Ok(false)` means
    /// the stream ended cleanly and the policy ran out of attempts.
    async fn reconnect(&mut self, mut cause: Option<FirestoreError>) -> Result<bool, FirestoreError> {
        loop {
            let token = self.state.resume_token.clone();
            if token != self.opened_with {
                self.attempts = 0;
            }

            let wait = match self.policy.should_retry(SystemTime::now(), self.attempts) {
                RetryDecision::Retry { execute_after } => execute_after
                    .duration_since(SystemTime::now())
                    .unwrap_or_default(),
                RetryDecision::DoNotRetry => {
                    return match cause {
                        Some(e) => Err(e),
                        None => Ok(false),
                    };
                }
            };
            self.attempts += 1;
            warn!(
                attempt = self.attempts,
                wait_ms = wait.as_millis() as u64,
                cause = ?cause,
                "listen stream interrupted, reconnecting"
            );
            tokio::time::sleep(wait).await;

            self.state.reopen();
            self.request.add_target.resume_token = token.clone();
            self.opened_with = token;
            match open_listen(&self.client, &self.url, &self.request).await {
                Ok(stream) => {
                    self.stream = stream;
                    return Ok(true);
                }
                Err(e) if e.is_transient() => cause = Some(e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Converts the watch into a stream of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Result<WatchSnapshot, FirestoreError>> + Send {
        stream::unfold(self, |mut watch| async move {
            watch.next_snapshot().await.map(|item| (item, watch))
        })
    }
}
