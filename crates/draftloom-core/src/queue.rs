//! Error queue and retry scheduler
//!
//! A bounded-retry priority queue for deferred error processing. Items
//! wrap the structured `CategorizedError`; the queue re-sorts on every
//! enqueue, drains under a single-flight guard, and drops items once
//! their attempts are exhausted.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::CategorizedError;
use crate::error::Result;

/// Priority assigned when the caller does not provide one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Attempts before an item leaves the queue permanently
pub const MAX_ATTEMPTS: u32 = 3;

/// Floor for decremented priorities
pub const MIN_PRIORITY: i32 = 1;

/// An error awaiting deferred processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedError {
    pub id: Uuid,
    pub error: CategorizedError,
    /// Mutable: decremented on each failed retry, floored at 1
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Strictly increasing; the item is dropped once this reaches 3
    pub attempts: u32,
    pub metadata: Option<serde_json::Value>,
}

/// Priority queue of errors with bounded retries
pub struct ErrorQueue {
    items: Mutex<Vec<QueuedError>>,
    processing: AtomicBool,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }

    /// Enqueue an error, re-sorting the queue by descending priority
    pub fn enqueue(
        &self,
        error: CategorizedError,
        priority: Option<i32>,
        metadata: Option<serde_json::Value>,
    ) -> Uuid {
        let item = QueuedError {
            id: Uuid::new_v4(),
            error,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
            enqueued_at: Utc::now(),
            attempts: 0,
            metadata,
        };
        let id = item.id;

        let mut items = self.items.lock().expect("error queue lock poisoned");
        items.push(item);
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(error_id = %id, queued = items.len(), "Error enqueued");

        id
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queue contents, highest priority first
    pub fn snapshot(&self) -> Vec<QueuedError> {
        self.items
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Drop all queued items
    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }

    /// Drain the queue one item at a time
    ///
    /// Guarded by a single-flight flag: a concurrent call while a drain is
    /// in progress is a no-op. The processor reports whether it handled
    /// the item; `Ok(false)` or an error with attempts remaining sends the
    /// item back with its priority decremented (floor 1), otherwise the
    /// item leaves the queue permanently.
    pub async fn process_queue<F, Fut>(&self, mut processor: F)
    where
        F: FnMut(QueuedError) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("Queue drain already in progress");
            return;
        }

        loop {
            let next = {
                let mut items = match self.items.lock() {
                    Ok(items) => items,
                    Err(_) => break,
                };
                if items.is_empty() {
                    None
                } else {
                    Some(items.remove(0))
                }
            };

            let Some(mut item) = next else { break };
            item.attempts += 1;

            let handled = match processor(item.clone()).await {
                Ok(handled) => handled,
                Err(e) => {
                    warn!(error_id = %item.id, error = %e, "Queue processor failed");
                    false
                }
            };

            if handled {
                debug!(error_id = %item.id, attempts = item.attempts, "Queued error handled");
            } else if item.attempts < MAX_ATTEMPTS {
                item.priority = (item.priority - 1).max(MIN_PRIORITY);
                if let Ok(mut items) = self.items.lock() {
                    items.push(item);
                    items.sort_by(|a, b| b.priority.cmp(&a.priority));
                }
            } else {
                info!(
                    error_id = %item.id,
                    attempts = item.attempts,
                    "Dropping queued error after exhausting retries"
                );
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Drain the queue in batches
    ///
    /// Items handed to the batch processor leave the queue; batched
    /// processing carries no retry semantics.
    pub async fn process_batch<F, Fut>(&self, mut processor: F, batch_size: usize)
    where
        F: FnMut(Vec<QueuedError>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let batch_size = batch_size.max(1);

        loop {
            let batch = {
                let mut items = match self.items.lock() {
                    Ok(items) => items,
                    Err(_) => break,
                };
                if items.is_empty() {
                    break;
                }
                let take = batch_size.min(items.len());
                items.drain(..take).collect::<Vec<_>>()
            };

            let count = batch.len();
            if let Err(e) = processor(batch).await {
                warn!(batch = count, error = %e, "Batch processor failed");
            }
        }
    }

    /// Collapse duplicates sharing message and category
    ///
    /// The surviving duplicate is the one with the higher priority.
    pub fn deduplicate(&self) {
        let Ok(mut items) = self.items.lock() else {
            return;
        };

        let mut seen: Vec<QueuedError> = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let key = (item.error.message.clone(), item.error.category);
            match seen
                .iter_mut()
                .find(|existing| (existing.error.message.clone(), existing.error.category) == key)
            {
                Some(existing) => {
                    if item.priority > existing.priority {
                        *existing = item;
                    }
                }
                None => seen.push(item),
            }
        }

        seen.sort_by(|a, b| b.priority.cmp(&a.priority));
        *items = seen;
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorCategory, Fixability, Severity};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn categorized(message: &str) -> CategorizedError {
        CategorizedError {
            category: ErrorCategory::Syntax,
            severity: Severity::High,
            fixability: Fixability::Auto,
            message: message.to_string(),
            stack: None,
            context: None,
        }
    }

    #[test]
    fn test_enqueue_sorts_by_priority() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("low"), Some(1), None);
        queue.enqueue(categorized("high"), Some(9), None);
        queue.enqueue(categorized("mid"), Some(5), None);

        let snapshot = queue.snapshot();
        let priorities: Vec<i32> = snapshot.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![9, 5, 1]);
    }

    #[tokio::test]
    async fn test_always_failing_item_retried_twice_then_dropped() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("stubborn"), Some(5), None);

        let observed: Arc<Mutex<Vec<(u32, i32)>>> = Arc::new(Mutex::new(Vec::new()));
        let observed_in = observed.clone();

        queue
            .process_queue(move |item| {
                let observed = observed_in.clone();
                async move {
                    observed
                        .lock()
                        .unwrap()
                        .push((item.attempts, item.priority));
                    Ok(false)
                }
            })
            .await;

        assert!(queue.is_empty());
        let observed = observed.lock().unwrap();
        // Initial attempt at priority 5, retries at 4 and 3, then dropped
        assert_eq!(*observed, vec![(1, 5), (2, 4), (3, 3)]);
    }

    #[tokio::test]
    async fn test_successful_item_leaves_queue() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("fixable"), None, None);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        queue
            .process_queue(move |_item| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;

        assert!(queue.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_processor_error_counts_as_failure() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("thrower"), Some(2), None);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        queue
            .process_queue(move |_item| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::Error::Other("processor exploded".to_string()))
                }
            })
            .await;

        assert!(queue.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_priority_floor() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("floored"), Some(1), None);

        let observed: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let observed_in = observed.clone();
        queue
            .process_queue(move |item| {
                let observed = observed_in.clone();
                async move {
                    observed.lock().unwrap().push(item.priority);
                    Ok(false)
                }
            })
            .await;

        // Priority never drops below the floor of 1
        assert_eq!(*observed.lock().unwrap(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_single_flight_guard() {
        let queue = Arc::new(ErrorQueue::new());
        queue.enqueue(categorized("slow"), None, None);

        let calls = Arc::new(AtomicUsize::new(0));

        let queue_a = queue.clone();
        let calls_a = calls.clone();
        let first = tokio::spawn(async move {
            queue_a
                .process_queue(move |_item| {
                    let calls = calls_a.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(true)
                    }
                })
                .await;
        });

        // Give the first drain time to claim the flag
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // Concurrent drain is a no-op even though the first is mid-flight
        let calls_b = calls.clone();
        queue
            .process_queue(move |_item| {
                let calls = calls_b.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;

        first.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_batch_drains_in_slices() {
        let queue = ErrorQueue::new();
        for i in 0..5 {
            queue.enqueue(categorized(&format!("e{i}")), Some(i), None);
        }

        let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let batches_in = batches.clone();
        queue
            .process_batch(
                move |batch| {
                    let batches = batches_in.clone();
                    async move {
                        batches.lock().unwrap().push(batch.len());
                        Ok(())
                    }
                },
                2,
            )
            .await;

        assert!(queue.is_empty());
        assert_eq!(*batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn test_deduplicate_keeps_higher_priority() {
        let queue = ErrorQueue::new();
        queue.enqueue(categorized("dup"), Some(3), None);
        queue.enqueue(categorized("dup"), Some(7), None);
        queue.enqueue(categorized("unique"), Some(5), None);

        queue.deduplicate();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        let dup = snapshot.iter().find(|i| i.error.message == "dup").unwrap();
        assert_eq!(dup.priority, 7);
    }

    #[test]
    fn test_deduplicate_distinguishes_categories() {
        let queue = ErrorQueue::new();
        let mut network = categorized("same message");
        network.category = ErrorCategory::Network;
        queue.enqueue(categorized("same message"), Some(5), None);
        queue.enqueue(network, Some(5), None);

        queue.deduplicate();
        assert_eq!(queue.len(), 2);
    }
}
