//! Sequencer (§4.5): guarantees responses reach a client in the exact
//! order `enqueue` was called, regardless of the order the Processor
//! calls `deliver`. One instance is owned per client connection — the
//! FIFO guarantee is scoped "per client" (§8 invariant 4), and a
//! per-connection worker is the direct way to provide that without
//! inventing cross-connection coordination the design doesn't ask for.
//!
//! Waiting is a `Notify` wake, not a spin — the design notes call out
//! that the reference implementation spins and that a correct
//! re-architecture signals instead.

use crate::coalescer::RequestId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};

#[derive(Clone)]
pub enum ResponseData {
    Read(Box<[u8]>),
    Write(bool),
}

/// Where the Sequencer's drained-in-order responses go. Implemented by
/// the connection handler, which knows how to frame a `ResponseData`
/// back onto the client's socket (§6); the Sequencer itself is wire-
/// format agnostic.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, id: RequestId, data: ResponseData);
}

#[derive(Default)]
struct State {
    queue: VecDeque<RequestId>,
    results: HashMap<RequestId, ResponseData>,
}

pub struct Sequencer {
    state: Mutex<State>,
    notify: Notify,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Registers `id`'s ordering slot. Must be called before the
    /// corresponding `deliver` to establish FIFO order.
    pub async fn enqueue(&self, id: RequestId) {
        self.state.lock().await.queue.push_back(id);
        self.notify.notify_waiters();
    }

    /// Supplies the answer for `id`, whenever the Processor has it. May
    /// arrive before or after other requests ahead of it in the queue.
    pub async fn deliver(&self, id: RequestId, data: ResponseData) {
        self.state.lock().await.results.insert(id, data);
        self.notify.notify_waiters();
    }

    /// Runs until the connection closes (the caller stops polling). On
    /// each iteration, blocks until the queue's head has a ready result,
    /// then hands it to `sink` and advances.
    pub async fn run(&self, sink: &dyn ResponseSink) {
        loop {
            let Some((id, data)) = self.take_ready_head().await else {
                self.notify.notified().await;
                continue;
            };
            sink.send(id, data).await;
        }
    }

    /// Polls until the head of the queue is ready and returns it, without
    /// spawning the long-running `run` worker. Used by tests that drive
    /// the Processor directly rather than through a live connection.
    pub async fn poll_once(&self) -> (RequestId, ResponseData) {
        loop {
            if let Some(ready) = self.take_ready_head().await {
                return ready;
            }
            tokio::task::yield_now().await;
        }
    }

    async fn take_ready_head(&self) -> Option<(RequestId, ResponseData)> {
        let mut state = self.state.lock().await;
        let head = *state.queue.front()?;
        let data = state.results.remove(&head)?;
        state.queue.pop_front();
        Some((head, data))
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
