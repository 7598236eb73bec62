// src/core/connector.rs

//! Per-server connection task: resolves the server address, opens and
//! connects the upstream and downstream UDP sockets, and marks the server
//! started. Retries are unbounded so the gateway rides out indefinite DNS or
//! routing outages.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::CONNECT_RETRY_DELAY;
use crate::core::errors::FwdError;
use crate::core::state::GatewayState;

pub struct Connector {
    state: Arc<GatewayState>,
    index: usize,
}

impl Connector {
    pub fn new(state: Arc<GatewayState>, index: usize) -> Self {
        Self { state, index }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let address = self.state.links[self.index].conf.server_address.clone();
        info!("starting connection for server {address}");

        loop {
            match self.attempt().await {
                Ok((up, down)) => {
                    info!("successfully contacted server {address}");
                    self.state.links[self.index].publish(up, down);
                    self.state.registry.set_started(self.index);
                    return;
                }
                Err(e) => warn!("connection to server {address} failed: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {
                    info!("retry connection for server {address}");
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn attempt(&self) -> Result<(UdpSocket, UdpSocket), FwdError> {
        let conf = &self.state.links[self.index].conf;
        let up = connect_udp(&conf.server_address, conf.serv_port_up).await?;
        let down = connect_udp(&conf.server_address, conf.serv_port_down).await?;
        Ok((up, down))
    }
}

/// Resolves `host:port` and connects a datagram socket to the first
/// candidate address that accepts it, so later send/recv are tied to that
/// single peer.
async fn connect_udp(host: &str, port: u16) -> Result<UdpSocket, FwdError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    if candidates.is_empty() {
        return Err(FwdError::Internal(format!("no address found for {host}:{port}")));
    }
    let mut last_err = None;
    for candidate in candidates {
        let local: SocketAddr = if candidate.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid literal")
        } else {
            "[::]:0".parse().expect("valid literal")
        };
        let socket = match UdpSocket::bind(local).await {
            Ok(socket) => socket,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        match socket.connect(candidate).await {
            Ok(()) => return Ok(socket),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(FwdError::Io)
        .unwrap_or_else(|| FwdError::Internal(format!("cannot connect to {host}:{port}"))))
}
