//! Oblivious-access proxy core for Path ORAM block storage. The crate
//! exposes the engine (`Oram`) and its components; `main.rs` is a thin
//! binary wrapper that wires a TCP listener and config/logging around it.

pub mod block;
pub mod bucket;
pub mod coalescer;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod net;
pub mod oram;
pub mod path;
pub mod position_map;
pub mod processor;
pub mod rng;
pub mod sequencer;
pub mod stash;
pub mod subtree;

pub use block::{Block, BlockId};
pub use config::Config;
pub use error::{Error, Result};
pub use oram::Oram;
