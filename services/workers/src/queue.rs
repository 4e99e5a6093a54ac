//! Work queue interface and clients.
//!
//! The queue is an external collaborator: delivery, redelivery, and
//! concurrent-consumer safety belong to it, not to this process. The
//! worker loop only ever claims one item at a time and completes items it
//! has finished processing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport failure talking to the queue.
    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Queue rejected the request.
    #[error("queue returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Queue response could not be decoded.
    #[error("malformed queue response: {0}")]
    Malformed(String),
}

/// One unit of work claimed from the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItem {
    /// Queue-assigned message identifier.
    pub id: String,

    /// Opaque payload; its meaning belongs to the handler.
    pub body: serde_json::Value,

    /// When the item entered the queue.
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// External work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Claim the next item, if any.
    async fn fetch_one(&self) -> Result<Option<WorkItem>, QueueError>;

    /// Mark an item as done so the queue stops redelivering it.
    async fn complete(&self, item: &WorkItem) -> Result<(), QueueError>;
}

/// HTTP-backed work queue client.
pub struct HttpWorkQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkQueue {
    /// Create a client for the given queue endpoint.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn fetch_one(&self) -> Result<Option<WorkItem>, QueueError> {
        let url = format!("{}/messages/next", self.base_url);

        let response = self.client.post(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let item: WorkItem = response
            .json()
            .await
            .map_err(|e| QueueError::Malformed(e.to_string()))?;
        debug!(item_id = %item.id, "Claimed work item");
        Ok(Some(item))
    }

    async fn complete(&self, item: &WorkItem) -> Result<(), QueueError> {
        let url = format!("{}/messages/{}", self.base_url, item.id);

        let response = self.client.delete(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(item_id = %item.id, "Completed work item");
        Ok(())
    }
}

/// In-memory FIFO queue for tests and local development.
pub struct InMemoryQueue {
    items: Mutex<VecDeque<WorkItem>>,
    completed: Mutex<Vec<String>>,
    polls: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            polls: AtomicU64::new(0),
        }
    }

    /// Enqueue an item.
    pub fn push(&self, item: WorkItem) {
        self.items
            .lock()
            .expect("queue lock poisoned")
            .push_back(item);
    }

    /// Ids of items completed so far, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().expect("queue lock poisoned").clone()
    }

    /// Number of fetch calls served so far.
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn fetch_one(&self) -> Result<Option<WorkItem>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.lock().expect("queue lock poisoned").pop_front())
    }

    async fn complete(&self, item: &WorkItem) -> Result<(), QueueError> {
        self.completed
            .lock()
            .expect("queue lock poisoned")
            .push(item.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_decodes_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg-1",
                "body": {"kind": "report_requested"},
                "enqueued_at": "2026-08-07T09:00:00Z"
            })))
            .mount(&server)
            .await;

        let queue = HttpWorkQueue::new(server.uri());
        let item = queue.fetch_one().await.unwrap().unwrap();

        assert_eq!(item.id, "msg-1");
        assert_eq!(item.body["kind"], "report_requested");
        assert!(item.enqueued_at.is_some());
    }

    #[tokio::test]
    async fn test_no_content_means_empty_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/next"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let queue = HttpWorkQueue::new(server.uri());
        assert!(queue.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_deletes_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/messages/msg-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let queue = HttpWorkQueue::new(server.uri());
        let item = WorkItem {
            id: "msg-1".to_string(),
            body: serde_json::Value::Null,
            enqueued_at: None,
        };

        queue.complete(&item).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/next"))
            .respond_with(ResponseTemplate::new(500).set_body_string("queue down"))
            .mount(&server)
            .await;

        let queue = HttpWorkQueue::new(server.uri());
        let err = queue.fetch_one().await.unwrap_err();

        assert!(matches!(err, QueueError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_in_memory_queue_is_fifo() {
        let queue = InMemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.push(WorkItem {
                id: id.to_string(),
                body: serde_json::Value::Null,
                enqueued_at: None,
            });
        }

        assert_eq!(queue.fetch_one().await.unwrap().unwrap().id, "a");
        assert_eq!(queue.fetch_one().await.unwrap().unwrap().id, "b");
        assert_eq!(queue.fetch_one().await.unwrap().unwrap().id, "c");
        assert!(queue.fetch_one().await.unwrap().is_none());
        assert_eq!(queue.poll_count(), 4);
    }
}
