use super::{aws_error, QueueMessage, WorkQueue};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: SqsClient, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn receive_messages(&self, max: i32) -> Result<Vec<QueueMessage>, AppError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .send()
            .await
            .map_err(|e| aws_error("SQS ReceiveMessage", DisplayErrorContext(e)))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(QueueMessage {
                    body: m.body()?.to_string(),
                    receipt_handle: m.receipt_handle()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), AppError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| aws_error("SQS DeleteMessage", DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn send_message(&self, body: &str) -> Result<(), AppError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| aws_error("SQS SendMessage", DisplayErrorContext(e)))?;
        tracing::debug!(queue_url = %self.queue_url, body = %body, "Message sent");
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    in_flight: HashMap<String, String>,
    sent: Vec<String>,
    deleted: Vec<String>,
}

/// In-process queue with SQS-like receive/delete semantics.
///
/// Received messages stay in flight until deleted; `redeliver_in_flight`
/// simulates a visibility timeout expiring.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    next_receipt: AtomicU64,
    fail_receive: Mutex<bool>,
    fail_delete_for: Mutex<HashSet<String>>,
    fail_send_for: Mutex<HashSet<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts messages on the queue without recording them as sent.
    pub fn seed<I, S>(&self, bodies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            state.pending.extend(bodies.into_iter().map(Into::into));
        }
    }

    pub fn fail_receive(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_receive.lock() {
            *flag = fail;
        }
    }

    pub fn fail_delete_for(&self, body: &str) {
        if let Ok(mut set) = self.fail_delete_for.lock() {
            set.insert(body.to_string());
        }
    }

    pub fn fail_send_for(&self, body: &str) {
        if let Ok(mut set) = self.fail_send_for.lock() {
            set.insert(body.to_string());
        }
    }

    pub fn redeliver_in_flight(&self) {
        if let Ok(mut state) = self.state.lock() {
            let bodies: Vec<String> = state.in_flight.drain().map(|(_, body)| body).collect();
            state.pending.extend(bodies);
        }
    }

    /// Bodies passed to `send_message`, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Bodies of messages that were deleted, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().map(|s| s.deleted.clone()).unwrap_or_default()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or_default()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or_default()
    }

    fn lock_error() -> AppError {
        AppError::InternalError(anyhow::anyhow!("memory queue lock poisoned"))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn receive_messages(&self, max: i32) -> Result<Vec<QueueMessage>, AppError> {
        if self.fail_receive.lock().map(|f| *f).unwrap_or(false) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "SQS ReceiveMessage failed: queue unavailable"
            )));
        }
        let mut state = self.state.lock().map_err(|_| Self::lock_error())?;
        let mut messages = Vec::new();
        while messages.len() < max.max(0) as usize {
            let Some(body) = state.pending.pop_front() else {
                break;
            };
            let receipt = format!("receipt-{}", self.next_receipt.fetch_add(1, Ordering::SeqCst));
            state.in_flight.insert(receipt.clone(), body.clone());
            messages.push(QueueMessage {
                body,
                receipt_handle: receipt,
            });
        }
        Ok(messages)
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().map_err(|_| Self::lock_error())?;
        let body = state.in_flight.get(receipt_handle).cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "SQS DeleteMessage failed: unknown receipt handle {}",
                receipt_handle
            ))
        })?;
        let should_fail = self
            .fail_delete_for
            .lock()
            .map(|set| set.contains(&body))
            .unwrap_or(false);
        if should_fail {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "SQS DeleteMessage failed for {}",
                body
            )));
        }
        state.in_flight.remove(receipt_handle);
        state.deleted.push(body);
        Ok(())
    }

    async fn send_message(&self, body: &str) -> Result<(), AppError> {
        let should_fail = self
            .fail_send_for
            .lock()
            .map(|set| set.contains(body))
            .unwrap_or(false);
        if should_fail {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "SQS SendMessage failed for {}",
                body
            )));
        }
        let mut state = self.state.lock().map_err(|_| Self::lock_error())?;
        state.sent.push(body.to_string());
        state.pending.push_back(body.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_receive_is_bounded_and_delete_acks() {
        let queue = MemoryQueue::new();
        queue.seed((0..12).map(|i| format!("{:012}", i)));

        let first = queue.receive_messages(10).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(queue.in_flight_len(), 10);

        queue.delete_message(&first[0].receipt_handle).await.unwrap();
        assert_eq!(queue.deleted(), vec!["000000000000".to_string()]);

        let second = queue.receive_messages(10).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(queue.receive_messages(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_redelivers_unacked() {
        let queue = MemoryQueue::new();
        queue.seed(["111111111111"]);
        let received = queue.receive_messages(10).await.unwrap();
        assert_eq!(received.len(), 1);
        queue.redeliver_in_flight();
        assert_eq!(queue.pending_len(), 1);
    }
}
