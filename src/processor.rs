//! Processor (§4.4): the core orchestration loop. `read_path` is the
//! client-visible entry point; `answer_request` resolves the coalescer
//! race once a path comes back; `flush` greedily evicts the stash onto
//! the just-read path; `write_back` batches evicted paths out to the
//! storage servers.
//!
//! Every server round trip is a suspension point and no lock is held
//! across one: the request-table registration in `read_path` completes
//! and releases before the network send, and `flush`'s per-path lock is
//! only held for the CPU-bound eviction, never across `write_back`'s I/O.

use crate::{
    block::{Block, BlockId},
    coalescer::{
        ClientRequest, InflightPaths, RequestKind, RequestTable, ResponseTable, SetDataOutcome,
        SetReturnedOutcome,
    },
    config::Config,
    crypto::PathCipher,
    error::{Error, Result},
    metrics,
    net::{ServerLink, WriteBatchEntry},
    path::{greatest_common_level, LeafId, Path},
    position_map::PositionMap,
    rng::SecureRng,
    sequencer::{ResponseData, Sequencer},
    stash::Stash,
    subtree::SubtreeCache,
};
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use tracing::{instrument, warn};

pub struct Processor {
    config: Arc<Config>,
    position_map: Arc<PositionMap>,
    stash: Arc<Stash>,
    subtree: Arc<SubtreeCache>,
    request_table: Arc<RequestTable>,
    response_table: Arc<ResponseTable>,
    inflight: Arc<InflightPaths>,
    cipher: Arc<dyn PathCipher>,
    rng: Arc<dyn SecureRng>,
    links: HashMap<SocketAddr, Arc<dyn ServerLink>>,
    sequencers: Mutex<HashMap<u64, Arc<Sequencer>>>,
    write_back_counter: AtomicU64,
    next_write_back: AtomicU64,
    write_back_queue: Mutex<VecDeque<LeafId>>,
}

impl Processor {
    pub fn new(
        config: Arc<Config>,
        position_map: Arc<PositionMap>,
        stash: Arc<Stash>,
        subtree: Arc<SubtreeCache>,
        cipher: Arc<dyn PathCipher>,
        rng: Arc<dyn SecureRng>,
        links: HashMap<SocketAddr, Arc<dyn ServerLink>>,
    ) -> Self {
        // The first batch should ship after K flushes, not on the first one:
        // write_back's CAS claims a slot only once write_back_counter
        // reaches next_write_back, so next_write_back starts at K itself.
        let write_back_threshold = config.write_back_threshold;

        Self {
            config,
            position_map,
            stash,
            subtree,
            request_table: Arc::new(RequestTable::new()),
            response_table: Arc::new(ResponseTable::new()),
            inflight: Arc::new(InflightPaths::new()),
            cipher,
            rng,
            links,
            sequencers: Mutex::new(HashMap::new()),
            write_back_counter: AtomicU64::new(0),
            next_write_back: AtomicU64::new(write_back_threshold),
            write_back_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Entry point for a freshly received client request: registers it
    /// with the Sequencer for FIFO ordering, then drives it to
    /// completion. Intended to be spawned as its own task per request so
    /// a slow path fetch for one request never blocks the reception of
    /// the next one on the same connection.
    pub async fn submit(self: &Arc<Self>, request: ClientRequest, sequencer: Arc<Sequencer>) -> Result<()> {
        sequencer.enqueue(request.id).await;
        self.sequencers.lock().await.insert(request.id.0, sequencer);

        if let Err(err) = self.read_path(request.clone()).await {
            warn!(request_id = request.id.0, error = %err, "request failed");
            self.sequencers.lock().await.remove(&request.id.0);
            return Err(err);
        }
        Ok(())
    }

    /// Read-only handle onto the position map. Exposed for integration
    /// tests that need to observe remapping without a client round trip;
    /// the wire protocol never surfaces a block's leaf directly.
    pub fn position_map(&self) -> &Arc<PositionMap> {
        &self.position_map
    }

    async fn deliver(&self, id: crate::coalescer::RequestId, kind: &RequestKind, data: Box<[u8]>) {
        let sequencer = self.sequencers.lock().await.remove(&id.0);
        let Some(sequencer) = sequencer else { return };

        let response = match kind {
            RequestKind::Read => ResponseData::Read(data),
            RequestKind::Write(_) => ResponseData::Write(true),
        };
        sequencer.deliver(id, response).await;
    }

    /// §4.4.1.
    #[instrument(skip(self, request), fields(request_id = request.id.0, block_id = request.block_id.0))]
    async fn read_path(self: &Arc<Self>, request: ClientRequest) -> Result<()> {
        self.response_table.register(request.id).await;

        // register() tells us whether this request's block already had a
        // pending waiter: if not, this is the real read that picks the
        // block's actual (or freshly assigned) leaf.
        let is_real = self.request_table.register(request.clone()).await;

        let leaf = if is_real {
            match self.position_map.get(request.block_id).await {
                Some(leaf) => leaf,
                None => self.rng.random_leaf(self.position_map.num_leaves()),
            }
        } else {
            self.rng.random_leaf(self.position_map.num_leaves())
        };

        metrics::record_inflight_paths(self.inflight.increment(leaf).await);

        let server_addr = self.position_map.server_of(leaf);
        let relative_leaf = self.position_map.relative_leaf(leaf);
        let link = self
            .links
            .get(&server_addr)
            .cloned()
            .ok_or_else(|| Error::ServerUnavailable(server_addr.to_string()))?;

        let fetch_result = retry_io(|| {
            let link = link.clone();
            async move { link.read_path(relative_leaf).await }
        })
        .await;

        let encrypted = match fetch_result {
            Ok(bytes) => bytes,
            Err(err) => {
                metrics::record_inflight_paths(self.inflight.decrement(leaf).await);

                if is_real {
                    // No one else will ever drain this block's waiter list
                    // now — only the real read's `answer_request` does
                    // that. Left alone, every future request for this
                    // block would register as a fake read waiting on a
                    // drain that can never come. Release the whole list
                    // and forget each waiter's response slot so the next
                    // request elects a fresh real read instead.
                    let abandoned = self.request_table.drain(request.block_id).await;
                    for waiter in abandoned {
                        self.response_table.forget(waiter.id).await;
                    }
                } else {
                    self.response_table.forget(request.id).await;
                }

                return Err(err);
            }
        };

        let path = self.decode_path(leaf, &encrypted)?;
        self.answer_request(request, leaf, path, !is_real).await
    }

    fn decode_path(&self, leaf: LeafId, encrypted: &[u8]) -> Result<Path> {
        let bucket_len = self.cipher.wire_bucket_len(self.config.bucket_capacity);
        let mut buckets = Vec::with_capacity(self.config.tree_height as usize + 1);

        for level in 0..=self.config.tree_height {
            let start = level as usize * bucket_len;
            let chunk = encrypted
                .get(start..start + bucket_len)
                .ok_or(Error::Protocol)?;
            buckets.push(self.cipher.decrypt_bucket(chunk)?);
        }

        Ok(Path::new(leaf, buckets))
    }

    /// §4.4.2.
    async fn answer_request(
        self: &Arc<Self>,
        request: ClientRequest,
        leaf: LeafId,
        path: Path,
        is_fake: bool,
    ) -> Result<()> {
        self.subtree.add_path(path);

        if let SetReturnedOutcome::Deliver(data) = self.response_table.set_returned(request.id).await {
            self.deliver(request.id, &request.kind, data).await;
            metrics::record_inflight_paths(self.inflight.decrement(leaf).await);
            return Ok(());
        }

        if is_fake {
            metrics::record_inflight_paths(self.inflight.decrement(leaf).await);
            return Ok(());
        }

        let block_id = request.block_id;
        let mut element_exists = self.position_map.get(block_id).await.is_some();
        let waiters = self.request_table.drain(block_id).await;

        for waiter in waiters {
            let data: Box<[u8]> = if element_exists {
                self.subtree
                    .read_block(block_id)
                    .unwrap_or_else(|| Block::zeroed(block_id, self.config.block_size).data)
            } else {
                Block::zeroed(block_id, self.config.block_size).data
            };

            if let RequestKind::Write(payload) = &waiter.kind {
                if element_exists && self.subtree.write_block_in_place(block_id, payload.clone()) {
                    // overwritten in place
                } else {
                    self.stash.add(Block::new(block_id, payload.clone())).await;
                }
            }

            if let SetDataOutcome::Deliver(data) = self.response_table.set_data(waiter.id, data).await {
                self.deliver(waiter.id, &waiter.kind, data).await;
            }

            element_exists = true;
        }

        let new_leaf = self.rng.random_leaf(self.position_map.num_leaves());
        self.position_map.set(block_id, new_leaf).await;

        metrics::record_inflight_paths(self.inflight.decrement(leaf).await);

        self.flush(leaf).await?;
        self.write_back().await?;
        Ok(())
    }

    /// §4.4.3. Invoked immediately after every real read on `leaf`.
    async fn flush(&self, leaf: LeafId) -> Result<()> {
        let counter = self.write_back_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let stash_blocks = self.stash.snapshot().await;
        let path_preview = self.subtree.get_path(leaf).ok_or(Error::Protocol)?;

        let mut position_ids: Vec<BlockId> = stash_blocks.iter().map(|b| b.id).collect();
        position_ids.extend(path_preview.buckets.iter().flat_map(|b| b.iter().map(|blk| blk.id)));

        let mut positions = HashMap::with_capacity(position_ids.len());
        for id in position_ids {
            if let Some(pos) = self.position_map.get(id).await {
                positions.insert(id, pos);
            }
        }

        let height = self.config.tree_height;
        let outcome = self
            .subtree
            .with_path_mut(leaf, move |view| {
                let mut candidates: HashMap<BlockId, Block> = HashMap::new();
                for block in stash_blocks {
                    candidates.insert(block.id, block);
                }
                for level in 0..=height {
                    for block in view.drain_level(level) {
                        candidates.insert(block.id, block);
                    }
                }

                let mut heap: BinaryHeap<Candidate> = candidates
                    .into_values()
                    .map(|block| {
                        let target = positions.get(&block.id).copied().unwrap_or(LeafId(0));
                        let key = if positions.contains_key(&block.id) {
                            greatest_common_level(leaf, target, height)
                        } else {
                            0
                        };
                        Candidate { key, block }
                    })
                    .collect();

                let mut placed = Vec::new();

                for level in (0..=height).rev() {
                    loop {
                        match heap.peek() {
                            Some(top) if top.key == level => {
                                if view.bucket_mut(level).is_full() {
                                    break;
                                }
                                let candidate = heap.pop().expect("peeked");
                                let id = candidate.block.id;
                                view.place(level, candidate.block, counter);
                                placed.push(id);
                            }
                            _ => break,
                        }
                    }
                }

                let overflow: Vec<Block> = heap.into_vec().into_iter().map(|c| c.block).collect();
                (placed, overflow)
            })
            .ok_or(Error::Protocol)?;

        let (placed, overflow) = outcome;
        for id in placed {
            self.stash.remove(id).await;
        }

        if !overflow.is_empty() {
            for block in overflow {
                self.stash.add(block).await;
            }
            let len = self.stash.len().await;
            if len > self.config.stash_capacity {
                metrics::record_stash_overflow();
                warn!(stash_len = len, capacity = self.config.stash_capacity, "stash overflow");
            }
        }

        metrics::record_stash_size(self.stash.len().await);
        metrics::record_flush();

        self.write_back_queue.lock().await.push_back(leaf);
        Ok(())
    }

    /// §4.4.4.
    async fn write_back(self: &Arc<Self>) -> Result<()> {
        let k = self.config.write_back_threshold;

        let claimed = loop {
            let current_next = self.next_write_back.load(Ordering::SeqCst);
            let counter = self.write_back_counter.load(Ordering::SeqCst);
            if counter < current_next {
                return Ok(());
            }
            if self
                .next_write_back
                .compare_exchange(current_next, current_next + k, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break current_next;
            }
        };

        let write_back_timestamp = claimed;

        self.request_table.prune_empty().await;

        let mut queue = self.write_back_queue.lock().await;
        let take = k.min(queue.len() as u64) as usize;
        let leaves: Vec<LeafId> = queue.drain(..take).collect();
        drop(queue);

        let mut by_server: HashMap<SocketAddr, Vec<LeafId>> = HashMap::new();
        for leaf in &leaves {
            by_server.entry(self.position_map.server_of(*leaf)).or_default().push(*leaf);
        }

        let started = std::time::Instant::now();
        let mut handles = Vec::with_capacity(by_server.len());

        for (addr, group) in by_server {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.ship_group(addr, group).await }));
        }

        let mut all_ok = true;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                _ => all_ok = false,
            }
        }

        if all_ok {
            let protected = self.inflight.distinct_leaves_snapshot().await;
            for leaf in &leaves {
                self.subtree.delete_nodes(*leaf, write_back_timestamp, &protected);
            }
            metrics::record_write_back_batch(started.elapsed().as_secs_f64());
        } else {
            // Batch retried whole: put the leaves back for the next
            // successful attempt rather than losing the write-back.
            let mut queue = self.write_back_queue.lock().await;
            for leaf in leaves.into_iter().rev() {
                queue.push_front(leaf);
            }
        }

        Ok(())
    }

    async fn ship_group(&self, addr: SocketAddr, leaves: Vec<LeafId>) -> Result<()> {
        let link = self
            .links
            .get(&addr)
            .cloned()
            .ok_or_else(|| Error::ServerUnavailable(addr.to_string()))?;

        let mut entries = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            let path = self.subtree.get_path(*leaf).ok_or(Error::Protocol)?;
            let mut encrypted_path = Vec::new();
            for bucket in &path.buckets {
                encrypted_path.extend(self.cipher.encrypt_bucket(bucket)?);
            }
            entries.push(WriteBatchEntry {
                relative_leaf: self.position_map.relative_leaf(*leaf),
                encrypted_path,
            });
        }

        retry_io(|| {
            let link = link.clone();
            let entries = clone_entries(&entries);
            async move { link.write_paths(entries).await }
        })
        .await
    }
}

fn clone_entries(entries: &[WriteBatchEntry]) -> Vec<WriteBatchEntry> {
    entries
        .iter()
        .map(|e| WriteBatchEntry {
            relative_leaf: e.relative_leaf,
            encrypted_path: e.encrypted_path.clone(),
        })
        .collect()
}

async fn retry_io<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    retry(ExponentialBackoff::default(), || async {
        operation().await.map_err(|err| {
            if err.is_fatal() {
                BackoffError::permanent(err)
            } else {
                BackoffError::transient(err)
            }
        })
    })
    .await
}

struct Candidate {
    key: u32,
    block: Block,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key.cmp(&other.key)
    }
}
