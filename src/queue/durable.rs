//! In-process durable queue provider with visibility timeouts and receipts.
//!
//! Behaves like a hosted storage queue: a message is invisible until its
//! visibility timeout lapses, every visibility change issues a new pop receipt,
//! and operations presenting a stale receipt fail with `MessageNotFound`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{QueueEntry, Receipt};
use crate::queue::DurableQueue;

struct StoredMessage {
    entry: QueueEntry,
    pop_receipt: String,
    visible_at: Instant,
    dequeue_count: u32,
    sequence: u64,
}

#[derive(Default)]
struct State {
    messages: HashMap<String, StoredMessage>,
    next_sequence: u64,
}

/// Durable queue held in process memory.
#[derive(Default)]
pub struct MemoryDurableQueue {
    state: Mutex<State>,
}

impl MemoryDurableQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of messages still stored, visible or not.
    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Times the message has been handed out by `receive`.
    pub fn dequeue_count(&self, message_id: &str) -> Option<u32> {
        self.state()
            .messages
            .get(message_id)
            .map(|message| message.dequeue_count)
    }

    fn new_receipt() -> String {
        Uuid::new_v4().to_string()
    }

    fn checked<'a>(state: &'a mut State, receipt: &Receipt) -> Result<&'a mut StoredMessage> {
        match state.messages.get_mut(&receipt.message_id) {
            Some(message) if message.pop_receipt == receipt.pop_receipt => Ok(message),
            _ => Err(AppError::message_not_found(&receipt.message_id)),
        }
    }
}

#[async_trait]
impl DurableQueue for MemoryDurableQueue {
    async fn push(
        &self,
        entries: &[QueueEntry],
        visibility_timeout: Duration,
    ) -> Result<Vec<Receipt>> {
        let mut state = self.state();
        let visible_at = Instant::now() + visibility_timeout;
        let mut receipts = Vec::with_capacity(entries.len());
        for entry in entries {
            let receipt = Receipt {
                message_id: Uuid::new_v4().to_string(),
                pop_receipt: Self::new_receipt(),
                dequeue_count: 0,
            };
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let mut entry = entry.clone();
            entry.receipt = None;
            state.messages.insert(
                receipt.message_id.clone(),
                StoredMessage {
                    entry,
                    pop_receipt: receipt.pop_receipt.clone(),
                    visible_at,
                    dequeue_count: 0,
                    sequence,
                },
            );
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    async fn update_visibility_timeout(
        &self,
        receipt: &Receipt,
        visibility_timeout: Duration,
    ) -> Result<Receipt> {
        let mut state = self.state();
        let message = Self::checked(&mut state, receipt)?;
        message.pop_receipt = Self::new_receipt();
        message.visible_at = Instant::now() + visibility_timeout;
        Ok(Receipt {
            message_id: receipt.message_id.clone(),
            pop_receipt: message.pop_receipt.clone(),
            dequeue_count: message.dequeue_count,
        })
    }

    async fn done(&self, receipt: &Receipt) -> Result<()> {
        let mut state = self.state();
        Self::checked(&mut state, receipt)?;
        state.messages.remove(&receipt.message_id);
        Ok(())
    }

    async fn receive(&self, max: usize, visibility_timeout: Duration) -> Result<Vec<QueueEntry>> {
        let mut state = self.state();
        let now = Instant::now();
        let mut visible: Vec<(&String, &mut StoredMessage)> = state
            .messages
            .iter_mut()
            .filter(|(_, message)| message.visible_at <= now)
            .collect();
        visible.sort_by_key(|(_, message)| message.sequence);

        let mut entries = Vec::new();
        for (id, message) in visible.into_iter().take(max) {
            message.pop_receipt = Self::new_receipt();
            message.visible_at = now + visibility_timeout;
            message.dequeue_count += 1;
            let mut entry = message.entry.clone();
            entry.receipt = Some(Receipt {
                message_id: id.clone(),
                pop_receipt: message.pop_receipt.clone(),
                dequeue_count: message.dequeue_count,
            });
            entries.push(entry);
        }
        Ok(entries)
    }

    fn is_message_not_found(&self, error: &AppError) -> bool {
        matches!(error, AppError::MessageNotFound { .. })
    }

    async fn subscribe(&self) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        Ok(())
    }
}
