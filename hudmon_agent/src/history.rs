//! Bounded FIFO history of snapshots for late-joining viewers.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct HistoryRing<T> {
    buf: VecDeque<T>,
    cap: usize,
}

impl<T> HistoryRing<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            // Don't reserve the full hour up front; it fills at one entry per tick.
            buf: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    /// Push to the tail, dropping from the head while over capacity.
    /// A zero-capacity ring retains nothing.
    pub fn append(&mut self, v: T) {
        if self.cap == 0 {
            return;
        }
        while self.buf.len() >= self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl<T: Clone> HistoryRing<T> {
    /// Owned copy of the current contents, oldest first.
    pub fn snapshot_all(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}
