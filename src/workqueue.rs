//! Work queue integration port
//!
//! The orchestrator only ever publishes task-ready notifications; it never
//! claims or executes them. Claiming and execution belong to the worker
//! processes this crate treats as an external collaborator.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;

/// Sent to the queue when a task becomes ready to run
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskReadyMessage {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub attempt: u32,
}

/// Publish-side port into the execution work queue
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish immediately
    async fn publish(&self, message: TaskReadyMessage) -> Result<(), QueueError>;

    /// Publish after `delay` - used for retry backoff
    async fn publish_delayed(
        &self,
        message: TaskReadyMessage,
        delay: Duration,
    ) -> Result<(), QueueError>;
}

/// In-process reference implementation backed by a bounded channel
///
/// Delayed messages are published via a detached `tokio::spawn` sleep rather
/// than a real delay-queue mechanism - adequate for tests and demos, not for
/// a crash-safe deployment, where a persistent delay queue (e.g. a `run_at`
/// column polled by the worker) is required instead.
#[derive(Debug, Clone)]
pub struct InProcessWorkQueue {
    sender: tokio::sync::mpsc::Sender<TaskReadyMessage>,
}

impl InProcessWorkQueue {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<TaskReadyMessage>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl WorkQueue for InProcessWorkQueue {
    async fn publish(&self, message: TaskReadyMessage) -> Result<(), QueueError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))
    }

    async fn publish_delayed(
        &self,
        message: TaskReadyMessage,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(message).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_immediately() {
        let (queue, mut rx) = InProcessWorkQueue::new(4);
        let msg = TaskReadyMessage {
            task_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            attempt: 0,
        };
        queue.publish(msg.clone()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn publish_delayed_arrives_after_sleep() {
        let (queue, mut rx) = InProcessWorkQueue::new(4);
        let msg = TaskReadyMessage {
            task_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            attempt: 1,
        };
        queue
            .publish_delayed(msg.clone(), Duration::from_millis(5))
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, msg);
    }
}
