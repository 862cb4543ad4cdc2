//! Bounded transfer pool.
//!
//! Holds a queue of not-yet-started futures and runs at most `limit` of them
//! at once. Completions come out as a [`Stream`]; each completion frees a slot
//! that the next queued future takes on the following poll.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{FuturesUnordered, Stream, StreamExt};

pub struct TransferPool<F: Future> {
    limit: usize,
    queued: VecDeque<F>,
    running: FuturesUnordered<F>,
}

// Queued jobs are moved, never pinned; running ones are pinned on the heap
// by `FuturesUnordered`.
impl<F: Future> Unpin for TransferPool<F> {}

impl<F: Future> TransferPool<F> {
    /// A `limit` of zero is treated as one.
    pub fn new(limit: usize, jobs: impl IntoIterator<Item = F>) -> Self {
        Self {
            limit: limit.max(1),
            queued: jobs.into_iter().collect(),
            running: FuturesUnordered::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    fn fill_slots(&mut self) {
        while self.running.len() < self.limit {
            match self.queued.pop_front() {
                Some(job) => self.running.push(job),
                None => break,
            }
        }
    }
}

impl<F: Future> Stream for TransferPool<F> {
    type Item = F::Output;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.fill_slots();
        match this.running.poll_next_unpin(cx) {
            Poll::Ready(Some(output)) => {
                this.fill_slots();
                Poll::Ready(Some(output))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.running.len() + self.queued.len();
        (remaining, Some(remaining))
    }
}
