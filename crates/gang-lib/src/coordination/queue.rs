//! Named FIFO with separate peek and consume
//!
//! `get` waits for the head without removing it so a worker can announce
//! the item before acknowledging it with `consume`.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

pub struct WorkQueue<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T: Clone> WorkQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an item and wake one waiter
    pub fn put(&self, item: T) {
        self.items().push_back(item);
        self.available.notify_one();
    }

    /// Wait for the head item and return a copy of it, leaving it queued
    pub async fn get(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.items().front().cloned() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove the head item
    pub fn consume(&self) -> Option<T> {
        let mut items = self.items();
        let item = items.pop_front();
        if !items.is_empty() {
            self.available.notify_one();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn clear(&self) {
        self.items().clear();
    }
}
