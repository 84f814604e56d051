//! Fixed-capacity, newest-first history buffer.

use std::collections::VecDeque;

/// Keeps at most `capacity` entries, newest first. Pushing onto a full buffer
/// silently drops the oldest entry.
#[derive(Debug, Clone)]
pub struct RecentBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
