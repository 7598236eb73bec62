// src/core/upstream.rs

//! Upstream fanout: fetches uplink frames, filters them, serializes one
//! `PUSH_DATA` datagram and broadcasts it to every started server, then
//! collects acknowledgements per server.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::FETCH_SLEEP;
use crate::core::protocol::header::{Command, Header};
use crate::core::protocol::rxpk::RxPk;
use crate::core::protocol::iso8601_us;
use crate::core::state::GatewayState;
use crate::hal::{CrcStatus, NB_PKT_MAX, RxPacket};

/// Single worker serving all servers.
pub struct UpstreamWorker {
    state: Arc<GatewayState>,
}

impl UpstreamWorker {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!("upstream fanout activated for all servers");
        let mut rng = SmallRng::from_entropy();
        // which servers this worker has already observed as started
        let mut started = vec![false; self.state.links.len()];
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("upstream fanout shutting down");
                    return Ok(());
                }
                res = self.cycle(&mut rng, &mut started) => res?,
            }
        }
    }

    /// One fetch / serialize / fan-out cycle.
    async fn cycle(&self, rng: &mut SmallRng, started: &mut [bool]) -> anyhow::Result<()> {
        let conf = &self.state.config.gateway;

        let packets = {
            let mut concentrator = self.state.concentrator.lock().await;
            let mut packets = if conf.radiostream_enabled {
                concentrator
                    .receive(NB_PKT_MAX)
                    .context("failed packet fetch, exiting")?
            } else {
                Vec::new()
            };
            if let Some(ghost) = &self.state.ghost {
                packets.extend(ghost.fetch(NB_PKT_MAX - packets.len()));
            }
            packets
        };

        // single-writer (stats task) / single-reader, so no lock needed here
        let send_report = self.state.report_ready.load(Ordering::Relaxed);

        if packets.is_empty() && !send_report {
            tokio::time::sleep(FETCH_SLEEP).await;
            return Ok(());
        }

        // one time-reference snapshot for the whole batch
        let time_ref = if !packets.is_empty() && self.state.gps_active {
            self.state.gps_time_snapshot()
        } else {
            None
        };
        // local-clock fallback used for every packet when GPS is not active
        let fetch_time = iso8601_us(&Utc::now());

        let mut entries: Vec<RxPk> = Vec::with_capacity(packets.len());
        for packet in &packets {
            if !self.filter_packet(packet) {
                continue;
            }
            let time = if self.state.gps_active {
                time_ref
                    .and_then(|tref| tref.cnt2utc(packet.count_us).ok())
                    .map(|utc| iso8601_us(&utc))
            } else {
                Some(fetch_time.clone())
            };
            entries.push(RxPk::from_packet(packet, time));
        }

        // all packets filtered out and no report: restart without sending
        if entries.is_empty() && !send_report {
            return Ok(());
        }

        let mut body = serde_json::Map::new();
        if !entries.is_empty() {
            body.insert("rxpk".to_string(), serde_json::to_value(&entries)?);
        }
        if send_report {
            let report = {
                let slot = self.state.status_report.lock();
                self.state.report_ready.store(false, Ordering::Relaxed);
                slot.clone()
            };
            if let Some(report) = report {
                body.insert("stat".to_string(), serde_json::to_value(&report)?);
            }
        }

        let token: u16 = rng.r#gen();
        let mut datagram =
            Header::encode(token, Command::PushData, self.state.eui).to_vec();
        serde_json::to_writer(&mut datagram, &serde_json::Value::Object(body))?;

        self.fan_out(&datagram, token, started).await;
        Ok(())
    }

    /// Applies the CRC filter policies and updates the receive counters.
    /// Returns true when the packet must be forwarded.
    fn filter_packet(&self, packet: &RxPacket) -> bool {
        let conf = &self.state.config.gateway;
        let forward = {
            let mut meas = self.state.meas_up.lock();
            meas.nb_rx_rcv += 1;
            match packet.crc {
                CrcStatus::Ok => {
                    meas.nb_rx_ok += 1;
                    conf.fwd_valid_pkt
                }
                CrcStatus::Bad => {
                    meas.nb_rx_bad += 1;
                    conf.fwd_error_pkt
                }
                CrcStatus::NoCrc => {
                    meas.nb_rx_nocrc += 1;
                    conf.fwd_nocrc_pkt
                }
                CrcStatus::Unknown(_) => false,
            }
        };
        if let CrcStatus::Unknown(code) = packet.crc {
            warn!(
                status = code,
                size = packet.payload.len(),
                "received packet with unknown CRC status"
            );
        }
        if forward {
            let mut meas = self.state.meas_up.lock();
            meas.pkt_fwd += 1;
            meas.payload_byte += packet.payload.len() as u32;
        }
        forward
    }

    /// Sends the datagram to every started server in order and waits for a
    /// matching PUSH_ACK per server.
    async fn fan_out(&self, datagram: &[u8], token: u16, started: &mut [bool]) {
        let conf = &self.state.config.gateway;
        let ack_deadline = conf.push_timeout_half();

        for (index, link) in self.state.links.iter().enumerate() {
            if !started[index] {
                if self.state.registry.is_started(index) {
                    started[index] = true;
                } else {
                    continue;
                }
            }
            let Some(sock) = link.up() else { continue };

            if let Err(e) = sock.send(datagram).await {
                debug!("send to server {} failed: {e}", link.conf.server_address);
            }
            let send_time = Instant::now();
            {
                let mut meas = self.state.meas_up.lock();
                meas.dgram_sent += 1;
                meas.network_byte += datagram.len() as u32;
            }

            // wait for acknowledge, in 2 polls to catch extra packets
            let mut acked = false;
            let mut ack_buf = [0u8; 32];
            for _ in 0..2 {
                match tokio::time::timeout(ack_deadline, sock.recv(&mut ack_buf)).await {
                    Err(_) => continue, // timeout
                    Ok(Err(_)) => break, // server connection error
                    Ok(Ok(len)) => match Header::parse(&ack_buf[..len]) {
                        Some(header) if header.is_ack(Command::PushAck, token) => {
                            debug!(
                                "PUSH_ACK for server {} received in {} ms",
                                link.conf.server_address,
                                send_time.elapsed().as_millis()
                            );
                            acked = true;
                            break;
                        }
                        // invalid or out-of-sync reply
                        _ => continue,
                    },
                }
            }
            if acked {
                self.state.meas_up.lock().ack_rcv += 1;
            }
        }
    }
}
