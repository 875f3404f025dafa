//! Top-level wiring: builds the shared component graph (Position Map,
//! Stash, Subtree Cache, Processor) behind one handle, the way the
//! teacher's `Repository`/`Network` pair is assembled once at startup
//! and then cloned (via `Arc`) into every connection task.

use crate::{
    coalescer::{ClientRequest, RequestIdGen, RequestKind},
    config::Config,
    crypto::{ChaChaPathCipher, PathCipher},
    error::Result,
    net::{tcp::TcpServerLink, ServerLink},
    position_map::PositionMap,
    processor::Processor,
    rng::{OsSecureRng, SecureRng},
    sequencer::Sequencer,
    stash::Stash,
    subtree::SubtreeCache,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

pub struct Oram {
    pub config: Arc<Config>,
    processor: Arc<Processor>,
    request_ids: RequestIdGen,
}

impl Oram {
    /// Production constructor: fresh random path-encryption key, OS CSPRNG
    /// for leaf selection, real TCP links to every configured server.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let cipher: Arc<dyn PathCipher> = Arc::new(ChaChaPathCipher::generate(config.block_size));
        let rng: Arc<dyn SecureRng> = Arc::new(OsSecureRng);
        let links = build_tcp_links(&config.servers);
        Ok(Self::assemble(config, cipher, rng, links))
    }

    /// General constructor used directly by tests, which substitute a
    /// seeded RNG and/or an in-memory `ServerLink`.
    pub fn assemble(
        config: Arc<Config>,
        cipher: Arc<dyn PathCipher>,
        rng: Arc<dyn SecureRng>,
        links: HashMap<SocketAddr, Arc<dyn ServerLink>>,
    ) -> Arc<Self> {
        let position_map = Arc::new(PositionMap::new(config.servers.clone(), config.num_leaves()));
        let stash = Arc::new(Stash::new());
        let subtree = Arc::new(SubtreeCache::new(config.tree_height));

        let processor = Arc::new(Processor::new(
            Arc::clone(&config),
            position_map,
            stash,
            subtree,
            cipher,
            rng,
            links,
        ));

        Arc::new(Self {
            config,
            processor,
            request_ids: RequestIdGen::default(),
        })
    }

    /// Submits a client read, returning the request id the caller should
    /// use to correlate the eventual `Sequencer` delivery.
    pub async fn submit_read(self: &Arc<Self>, block_id: crate::block::BlockId, sequencer: Arc<Sequencer>) -> u64 {
        let request = ClientRequest {
            id: self.request_ids.next(),
            block_id,
            kind: RequestKind::Read,
        };
        let id = request.id.0;
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move { run_to_completion(processor, request, sequencer).await });
        id
    }

    pub async fn submit_write(
        self: &Arc<Self>,
        block_id: crate::block::BlockId,
        data: Box<[u8]>,
        sequencer: Arc<Sequencer>,
    ) -> u64 {
        let request = ClientRequest {
            id: self.request_ids.next(),
            block_id,
            kind: RequestKind::Write(data),
        };
        let id = request.id.0;
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move { run_to_completion(processor, request, sequencer).await });
        id
    }
}

/// A decrypt-authentication failure is the one error class the design
/// marks fatal (§7): it means a storage server is compromised or
/// misbehaving, and the proxy must terminate rather than keep serving.
async fn run_to_completion(processor: Arc<Processor>, request: ClientRequest, sequencer: Arc<Sequencer>) {
    if let Err(err) = processor.submit(request, sequencer).await {
        if err.is_fatal() {
            tracing::error!(error = %err, "fatal error, terminating");
            std::process::exit(1);
        }
    }
}

fn build_tcp_links(servers: &[SocketAddr]) -> HashMap<SocketAddr, Arc<dyn ServerLink>> {
    servers
        .iter()
        .map(|&addr| (addr, Arc::new(TcpServerLink::new(addr)) as Arc<dyn ServerLink>))
        .collect()
}
