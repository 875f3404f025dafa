//! Integration coverage for the six concrete scenarios of the design's
//! testable-properties section, run against an in-memory `FakeServerLink`
//! with a seeded deterministic RNG (B=4, Z=4, H=3, K=3).

use async_trait::async_trait;
use oram_proxy::{
    block::BlockId,
    coalescer::{ClientRequest, RequestId, RequestKind},
    config::Config,
    crypto::{ChaChaPathCipher, PathCipher},
    error::{Error, Result},
    net::{fake::FakeServerLink, ServerLink, WriteBatchEntry},
    position_map::PositionMap,
    processor::Processor,
    rng::SeededRng,
    sequencer::{ResponseData, Sequencer},
    stash::Stash,
    subtree::SubtreeCache,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

fn config_with(stash_capacity: usize) -> Arc<Config> {
    Arc::new(Config {
        tree_height: 3,
        bucket_capacity: 4,
        block_size: 4,
        stash_capacity,
        write_back_threshold: 3,
        client_listen_addr: "127.0.0.1:0".parse().unwrap(),
        servers: vec!["127.0.0.1:9100".parse().unwrap()],
    })
}

fn build(config: Arc<Config>, seed: u64) -> (Arc<Processor>, Arc<FakeServerLink>) {
    let cipher: Arc<dyn PathCipher> = Arc::new(ChaChaPathCipher::generate(config.block_size));
    let position_map = Arc::new(PositionMap::new(config.servers.clone(), config.num_leaves()));
    let stash = Arc::new(Stash::new());
    let subtree = Arc::new(SubtreeCache::new(config.tree_height));
    let rng = Arc::new(SeededRng::new(seed));

    let fake = Arc::new(FakeServerLink::new(config.tree_height, config.bucket_capacity, cipher.clone()));
    let mut links: HashMap<SocketAddr, Arc<dyn ServerLink>> = HashMap::new();
    links.insert(config.servers[0], fake.clone() as Arc<dyn ServerLink>);

    let processor = Arc::new(Processor::new(config, position_map, stash, subtree, cipher, rng, links));
    (processor, fake)
}

fn write_req(id: u64, block: u64, data: [u8; 4]) -> ClientRequest {
    ClientRequest {
        id: RequestId(id),
        block_id: BlockId(block),
        kind: RequestKind::Write(Box::new(data)),
    }
}

fn read_req(id: u64, block: u64) -> ClientRequest {
    ClientRequest {
        id: RequestId(id),
        block_id: BlockId(block),
        kind: RequestKind::Read,
    }
}

/// 1. `write(block=5, data)` then `read(block=5)` returns the write, and
/// the block's position-map entry changes after each access.
#[tokio::test]
async fn scenario_1_write_then_read_round_trips_and_remaps() {
    let config = config_with(64);
    let (processor, _fake) = build(config, 1);
    let sequencer = Arc::new(Sequencer::new());

    processor
        .submit(write_req(1, 5, [0xCA, 0xFE, 0xBA, 0xBE]), sequencer.clone())
        .await
        .unwrap();
    sequencer.poll_once().await;
    let leaf_after_write = processor.position_map().get(BlockId(5)).await;

    processor.submit(read_req(2, 5), sequencer.clone()).await.unwrap();
    let (_, data) = sequencer.poll_once().await;
    match data {
        ResponseData::Read(bytes) => assert_eq!(bytes.as_ref(), &[0xCA, 0xFE, 0xBA, 0xBE]),
        ResponseData::Write(_) => panic!("expected a read response"),
    }

    let leaf_after_read = processor.position_map().get(BlockId(5)).await;
    assert_ne!(leaf_after_write, leaf_after_read);
}

/// 2. Two concurrent reads of an unmapped block both return zeros, and
/// the block becomes mapped afterward.
#[tokio::test]
async fn scenario_2_concurrent_reads_of_unmapped_block_both_see_zeros() {
    let config = config_with(64);
    let (processor, _fake) = build(config, 2);
    let sequencer_a = Arc::new(Sequencer::new());
    let sequencer_b = Arc::new(Sequencer::new());

    let (res_a, res_b) = tokio::join!(
        processor.submit(read_req(1, 7), sequencer_a.clone()),
        processor.submit(read_req(2, 7), sequencer_b.clone()),
    );
    res_a.unwrap();
    res_b.unwrap();

    let (_, data_a) = sequencer_a.poll_once().await;
    let (_, data_b) = sequencer_b.poll_once().await;

    for data in [data_a, data_b] {
        match data {
            ResponseData::Read(bytes) => assert_eq!(bytes.as_ref(), &[0, 0, 0, 0]),
            ResponseData::Write(_) => panic!("expected a read response"),
        }
    }

    assert!(processor.position_map().get(BlockId(7)).await.is_some());
}

/// 3. Three writes with K=3 trigger exactly one write-back batch.
#[tokio::test]
async fn scenario_3_write_back_threshold_fires_exactly_once() {
    let config = config_with(64);
    let (processor, fake) = build(config, 3);
    let sequencer = Arc::new(Sequencer::new());

    for (i, block) in [1u64, 2, 3].into_iter().enumerate() {
        processor
            .submit(write_req(i as u64 + 1, block, [block as u8; 4]), sequencer.clone())
            .await
            .unwrap();
        sequencer.poll_once().await;
    }

    assert_eq!(fake.write_call_count(), 1);
}

/// 4. An adversarial pattern of writes to unmapped blocks can overflow a
/// small stash; the proxy logs the event but keeps serving requests.
#[tokio::test]
async fn scenario_4_stash_overflow_does_not_stop_the_proxy() {
    let config = config_with(1); // tiny capacity, easy to overflow
    let (processor, _fake) = build(config, 4);
    let sequencer = Arc::new(Sequencer::new());

    for block in 0..8u64 {
        processor
            .submit(write_req(block + 1, block, [block as u8; 4]), sequencer.clone())
            .await
            .unwrap();
        sequencer.poll_once().await;
    }

    // The proxy is still serving requests after the overflow-prone run.
    processor.submit(read_req(100, 0), sequencer.clone()).await.unwrap();
    sequencer.poll_once().await;
}

struct GarbageServerLink;

#[async_trait]
impl ServerLink for GarbageServerLink {
    async fn read_path(&self, _relative_leaf: u64) -> Result<Vec<u8>> {
        // Plausible-looking bytes that will never authenticate.
        Ok(vec![0x42; 4096])
    }

    async fn write_paths(&self, _entries: Vec<WriteBatchEntry>) -> Result<()> {
        Ok(())
    }
}

/// 5. A server returning an unauthenticatable path is a fatal error.
#[tokio::test]
async fn scenario_5_authentication_failure_is_fatal() {
    let config = config_with(64);
    let cipher: Arc<dyn PathCipher> = Arc::new(ChaChaPathCipher::generate(config.block_size));
    let position_map = Arc::new(PositionMap::new(config.servers.clone(), config.num_leaves()));
    let stash = Arc::new(Stash::new());
    let subtree = Arc::new(SubtreeCache::new(config.tree_height));
    let rng = Arc::new(SeededRng::new(5));

    let mut links: HashMap<SocketAddr, Arc<dyn ServerLink>> = HashMap::new();
    links.insert(config.servers[0], Arc::new(GarbageServerLink) as Arc<dyn ServerLink>);

    let processor = Arc::new(Processor::new(config, position_map, stash, subtree, cipher, rng, links));
    let sequencer = Arc::new(Sequencer::new());

    let err = processor
        .submit(read_req(1, 1), sequencer)
        .await
        .expect_err("garbage path must fail to decrypt");

    assert!(matches!(err, Error::Crypto));
    assert!(err.is_fatal());
}

/// 6. A client that vanishes mid-request does not stop the request from
/// completing; the response is simply never collected.
#[tokio::test]
async fn scenario_6_abandoned_sequencer_does_not_block_completion() {
    let config = config_with(64);
    let (processor, _fake) = build(config, 6);
    let sequencer = Arc::new(Sequencer::new());

    // Simulates a client disconnect: nobody ever polls this sequencer.
    processor
        .submit(write_req(1, 9, [7, 7, 7, 7]), sequencer)
        .await
        .unwrap();

    // The write completed server-side regardless.
    assert!(processor.position_map().get(BlockId(9)).await.is_some());
}
