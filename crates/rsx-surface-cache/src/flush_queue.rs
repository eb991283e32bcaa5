//! Cross-thread mailbox of pending write-back requests.
//!
//! Any thread may [`FlushQueue::post`] a request and then block in [`FlushRequest::wait`]. Only
//! the render thread drains the queue; it takes the whole pending batch under the queue lock and
//! services it with the lock released, in enqueue order.

use core::fmt;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

use crate::error::FlushError;
use crate::registry::SectionKey;
use crate::sync::{self, Arc, AtomicU64, Condvar, Mutex};

#[derive(Debug, Default)]
struct FlushState {
    received: bool,
    processed: bool,
    result: Option<Result<(), FlushError>>,
    completion: Option<u64>,
}

/// One outstanding write-back obligation.
///
/// The section is referenced by a generation-tagged key, never by pointer: if the render thread
/// evicts the section before servicing the request, the request completes with
/// [`FlushError::StaleSection`].
pub struct FlushRequest {
    address: u32,
    section: SectionKey,
    ticket: u64,
    state: Mutex<FlushState>,
    cv: Condvar,
}

impl FlushRequest {
    fn new(address: u32, section: SectionKey, ticket: u64) -> Self {
        Self {
            address,
            section,
            ticket,
            state: Mutex::new(FlushState::default()),
            cv: Condvar::new(),
        }
    }

    /// Faulting guest address that caused the request.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn section(&self) -> SectionKey {
        self.section
    }

    /// Enqueue sequence number.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// The render thread has dequeued the request. Does not imply [`Self::is_processed`].
    pub fn is_received(&self) -> bool {
        sync::lock(&self.state).received
    }

    pub fn is_processed(&self) -> bool {
        sync::lock(&self.state).processed
    }

    /// Queue-wide order in which requests were completed, once processed.
    pub fn completion_index(&self) -> Option<u64> {
        sync::lock(&self.state).completion
    }

    /// Result without blocking; `None` while pending.
    pub fn result(&self) -> Option<Result<(), FlushError>> {
        let state = sync::lock(&self.state);
        if state.processed {
            state.result.clone()
        } else {
            None
        }
    }

    /// Block until the render thread has processed the request.
    pub fn wait(&self) -> Result<(), FlushError> {
        let mut state = sync::lock(&self.state);
        while !state.processed {
            state = self
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.result.clone().unwrap_or(Err(FlushError::ShutDown))
    }

    fn mark_received(&self) {
        sync::lock(&self.state).received = true;
    }

    fn complete(&self, result: Result<(), FlushError>, completion: u64) {
        {
            let mut state = sync::lock(&self.state);
            state.received = true;
            state.result = Some(result);
            state.completion = Some(completion);
            state.processed = true;
        }
        self.cv.notify_all();
    }
}

impl fmt::Debug for FlushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushRequest")
            .field("address", &format_args!("{:#x}", self.address))
            .field("section", &self.section)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Arc<FlushRequest>>,
    next_ticket: u64,
    closed: bool,
}

pub struct FlushQueue {
    inner: Mutex<QueueInner>,
    next_completion: AtomicU64,
}

impl FlushQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            next_completion: AtomicU64::new(0),
        }
    }

    /// Append a request. After [`Self::close`] the request is completed immediately with
    /// [`FlushError::ShutDown`].
    pub fn post(&self, address: u32, section: SectionKey) -> Arc<FlushRequest> {
        let mut inner = sync::lock(&self.inner);
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        let request = Arc::new(FlushRequest::new(address, section, ticket));
        if inner.closed {
            drop(inner);
            self.complete(&request, Err(FlushError::ShutDown));
        } else {
            inner.pending.push_back(Arc::clone(&request));
        }
        request
    }

    /// Service every request pending at the time of the call, in enqueue order. Returns the
    /// number of requests processed.
    pub fn drain_with<F>(&self, mut service: F) -> usize
    where
        F: FnMut(&FlushRequest) -> Result<(), FlushError>,
    {
        let batch = core::mem::take(&mut sync::lock(&self.inner).pending);
        let serviced = batch.len();
        for request in batch {
            request.mark_received();
            let result = service(&request);
            self.complete(&request, result);
        }
        serviced
    }

    pub fn pending_len(&self) -> usize {
        sync::lock(&self.inner).pending.len()
    }

    pub fn is_closed(&self) -> bool {
        sync::lock(&self.inner).closed
    }

    /// Refuse new requests and fail the pending ones. Returns how many were pending.
    pub fn close(&self) -> usize {
        let batch = {
            let mut inner = sync::lock(&self.inner);
            inner.closed = true;
            core::mem::take(&mut inner.pending)
        };
        let failed = batch.len();
        for request in batch {
            self.complete(&request, Err(FlushError::ShutDown));
        }
        failed
    }

    fn complete(&self, request: &FlushRequest, result: Result<(), FlushError>) {
        let completion = self.next_completion.fetch_add(1, Ordering::SeqCst);
        request.complete(result, completion);
    }
}

impl Default for FlushQueue {
    fn default() -> Self {
        Self::new()
    }
}
