//! Binary entry point: parses configuration, starts logging, builds the
//! `Oram` core, and runs the client TCP listener until interrupted.
//!
//! Shutdown mirrors the teacher's `terminated()` helper: stop accepting
//! new connections on SIGINT/SIGTERM, but let in-flight requests run to
//! completion rather than cancel them — a cancelled read would leak the
//! cancellation itself (spec §5).

use clap::Parser;
use oram_proxy::{
    codec::{client as wire, read_frame, write_frame},
    coalescer::RequestId,
    config::Config,
    error::{Error, Result},
    logging,
    net::ClientTransport,
    oram::Oram,
    sequencer::{ResponseData, ResponseSink, Sequencer},
    BlockId,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncWriteExt, WriteHalf},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "oram-proxy", about = "Oblivious-access proxy for Path ORAM block storage")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "./oram-proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    logging::init();

    let args = Args::parse();
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "oram-proxy exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let listen_addr = config.client_listen_addr;
    let oram = Oram::from_config(config)?;

    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "listening for client connections");

    let accept_loop = async {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let oram = Arc::clone(&oram);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(oram, stream).await {
                            warn!(%peer, error = %err, "client connection closed with an error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "failed to accept client connection"),
            }
        }
    };

    tokio::select! {
        _ = accept_loop => {}
        _ = terminated() => {
            info!("shutdown signal received, draining in-flight requests");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn terminated() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => (),
        _ = terminate.recv() => (),
    }

    Ok(())
}

#[cfg(not(unix))]
async fn terminated() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Bridges the raw socket to the engine: decodes client frames, submits
/// them to the `Oram` core, and runs a per-connection `Sequencer` worker
/// so responses leave in the order requests arrived (§4.5/§8 invariant 4).
async fn handle_connection(oram: Arc<Oram>, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (mut read_half, write_half) = tokio::io::split(stream);

    let sequencer = Arc::new(Sequencer::new());
    let sink = Arc::new(SocketSink {
        write_half: Mutex::new(write_half),
    });

    let worker_sequencer = Arc::clone(&sequencer);
    let worker_sink = Arc::clone(&sink);
    let worker = tokio::spawn(async move { worker_sequencer.run(worker_sink.as_ref()).await });

    let result = read_requests(&oram, &mut read_half, &sequencer, peer).await;

    worker.abort();
    result
}

async fn read_requests(
    oram: &Arc<Oram>,
    read_half: &mut (impl tokio::io::AsyncRead + Unpin),
    sequencer: &Arc<Sequencer>,
    peer: SocketAddr,
) -> Result<()> {
    loop {
        let frame = match read_frame(read_half).await {
            Ok(frame) => frame,
            Err(Error::Io(_)) => return Ok(()), // peer disconnected
            Err(err) => return Err(err),
        };

        match frame.message_type {
            wire::CLIENT_READ_REQUEST => {
                let req = wire::ReadRequest::decode(&frame.payload)?;
                info!(%peer, request_id = req.request_id, "read request");
                oram.submit_read(BlockId(req.block_id), Arc::clone(sequencer)).await;
            }
            wire::CLIENT_WRITE_REQUEST => {
                let req = wire::WriteRequest::decode(&frame.payload, oram.config.block_size)?;
                info!(%peer, request_id = req.request_id, "write request");
                oram.submit_write(BlockId(req.block_id), req.data, Arc::clone(sequencer)).await;
            }
            _ => return Err(Error::Protocol),
        }
    }
}

struct SocketSink {
    write_half: Mutex<WriteHalf<TcpStream>>,
}

#[async_trait]
impl ClientTransport for SocketSink {
    async fn reply(&self, bytes: Bytes) -> Result<()> {
        let mut half = self.write_half.lock().await;
        half.write_all(&bytes).await?;
        half.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for SocketSink {
    async fn send(&self, id: RequestId, data: ResponseData) {
        let (message_type, payload) = match data {
            ResponseData::Read(bytes) => (
                wire::PROXY_RESPONSE_READ,
                wire::ReadResponse {
                    request_id: id.0,
                    data: bytes,
                }
                .encode(),
            ),
            ResponseData::Write(success) => (
                wire::PROXY_RESPONSE_WRITE,
                wire::WriteResponse {
                    request_id: id.0,
                    status: success as u8,
                }
                .encode(),
            ),
        };

        let mut half = self.write_half.lock().await;
        if let Err(err) = write_frame(&mut *half, message_type, &payload).await {
            warn!(request_id = id.0, error = %err, "failed to write client response");
        }
    }
}
