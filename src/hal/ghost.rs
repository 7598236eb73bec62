// src/hal/ghost.rs

//! Ghost packet source: a local UDP endpoint accepting synthetic uplinks.
//!
//! Each datagram carries one JSON `rxpk` object (the same schema the
//! upstream path emits). Decoded frames are buffered and drained by the
//! upstream fetch cycle, after which they are indistinguishable from radio
//! frames.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::RxPacket;
use crate::core::errors::FwdError;
use crate::core::protocol::rxpk::RxPk;

/// Max frames buffered before newly received ghost frames are dropped.
const GHOST_QUEUE_CAP: usize = 16;

/// Shared buffer of decoded ghost frames.
#[derive(Clone, Default)]
pub struct GhostStream {
    queue: Arc<Mutex<VecDeque<RxPacket>>>,
}

impl GhostStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain up to `max` buffered frames, oldest first.
    pub fn fetch(&self, max: usize) -> Vec<RxPacket> {
        let mut queue = self.queue.lock();
        let n = queue.len().min(max);
        queue.drain(..n).collect()
    }

    fn push(&self, pkt: RxPacket) {
        let mut queue = self.queue.lock();
        if queue.len() >= GHOST_QUEUE_CAP {
            warn!("ghost queue full, dropping frame");
            return;
        }
        queue.push_back(pkt);
    }
}

/// Background task feeding a [`GhostStream`] from a UDP socket.
pub struct GhostListener {
    socket: UdpSocket,
    stream: GhostStream,
}

impl GhostListener {
    pub async fn bind(addr: &str, port: u16, stream: GhostStream) -> Result<Self, FwdError> {
        let socket = UdpSocket::bind((addr, port)).await?;
        info!("ghost listener bound on {addr}:{port}");
        Ok(Self { socket, stream })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                res = self.socket.recv(&mut buf) => {
                    let len = match res {
                        Ok(len) => len,
                        Err(e) => {
                            warn!("ghost recv failed: {e}");
                            continue;
                        }
                    };
                    match serde_json::from_slice::<RxPk>(&buf[..len]) {
                        Ok(rxpk) => match rxpk.into_packet() {
                            Ok(pkt) => {
                                debug!(size = pkt.payload.len(), "ghost frame buffered");
                                self.stream.push(pkt);
                            }
                            Err(e) => warn!("invalid ghost frame: {e}"),
                        },
                        Err(e) => warn!("ghost datagram is not a valid rxpk object: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("ghost listener shutting down");
                    return;
                }
            }
        }
    }
}
