// src/core/downstream.rs

//! Per-server downstream loop: PULL_DATA keep-alive, PULL_RESP parsing and
//! TX scheduling, plus the opportunistic beacon handoff between datagrams.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::config::{BEACON_POLL, BEACON_POLL_BUDGET, PULL_TIMEOUT};
use crate::core::beacon::BeaconBuilder;
use crate::core::protocol::header::{Command, Header};
use crate::core::protocol::txpk::{GpsTimeLookup, PullResp};
use crate::core::state::{ExitReason, GatewayState};
use crate::hal::TxStatus;

/// One worker per enabled server.
pub struct DownstreamWorker {
    state: Arc<GatewayState>,
    index: usize,
}

impl DownstreamWorker {
    pub fn new(state: Arc<GatewayState>, index: usize) -> Self {
        Self { state, index }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let conf = &self.state.config.gateway;
        let address = self.state.links[self.index].conf.server_address.clone();

        tokio::select! {
            _ = self.state.registry.wait_started(self.index) => {}
            _ = shutdown_rx.recv() => return Ok(()),
        }
        info!("downstream loop activated for server {address}");

        // started implies the connector published both sockets
        let sock = self.state.links[self.index]
            .down()
            .expect("started server has a downstream socket");

        let mut rng = SmallRng::from_entropy();
        let mut beacon = BeaconBuilder::new(conf.ref_latitude, conf.ref_longitude);
        let mut buf = [0u8; 1000];
        // PULL_DATA sent since the latest PULL_ACK
        let mut autoquit_cnt: u32 = 0;

        loop {
            if shutdown_requested(&mut shutdown_rx) {
                info!("downstream loop for server {address} shutting down");
                return Ok(());
            }

            if conf.autoquit_threshold > 0 && autoquit_cnt >= conf.autoquit_threshold {
                error!(
                    "the last {} PULL_DATA to server {address} were not ACKed, exiting",
                    conf.autoquit_threshold
                );
                self.state.request_exit(ExitReason::Autoquit);
                return Ok(());
            }

            let token: u16 = rng.r#gen();
            let request = Header::encode(token, Command::PullData, self.state.eui);
            if let Err(e) = sock.send(&request).await {
                debug!("PULL_DATA send to server {address} failed: {e}");
            }
            let send_time = Instant::now();
            self.state.meas_dw.lock().pull_sent += 1;
            autoquit_cnt += 1;
            let mut req_ack = false;

            // listen until a new PULL request must be sent
            while send_time.elapsed() < conf.keepalive() {
                if shutdown_requested(&mut shutdown_rx) {
                    info!("downstream loop for server {address} shutting down");
                    return Ok(());
                }
                let received = tokio::time::timeout(PULL_TIMEOUT, sock.recv(&mut buf)).await;

                // if a beacon must go out, it takes priority over traffic
                self.beacon_check(&mut beacon).await;

                let len = match received {
                    Err(_) => continue, // receive timeout, normal path
                    Ok(Err(e)) => {
                        debug!("recv from server {address} failed: {e}");
                        continue;
                    }
                    Ok(Ok(len)) => len,
                };
                let Some(header) = Header::parse(&buf[..len]) else {
                    // undersized, wrong version or unknown command
                    continue;
                };
                match header.command {
                    Command::PullAck => {
                        if header.token != token {
                            debug!("received out-of-sync PULL_ACK from server {address}");
                        } else if req_ack {
                            debug!("duplicate PULL_ACK received from server {address}");
                        } else {
                            req_ack = true;
                            autoquit_cnt = 0;
                            self.state.meas_dw.lock().ack_rcv += 1;
                            debug!(
                                "PULL_ACK for server {address} received in {} ms",
                                send_time.elapsed().as_millis()
                            );
                        }
                    }
                    Command::PullResp => {
                        debug!("PULL_RESP received from server {address}");
                        self.handle_pull_resp(&buf[4..len], len).await;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Parses one PULL_RESP body and schedules the requested transmission.
    /// Per-datagram failures are logged and dropped; they never tear the
    /// loop down.
    async fn handle_pull_resp(&self, json: &[u8], dgram_len: usize) {
        let resp: PullResp = match serde_json::from_slice(json) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("invalid JSON in PULL_RESP, TX aborted: {e}");
                return;
            }
        };
        let txpk = resp.txpk;

        let gps_lookup = if !txpk.needs_gps_time() || !self.state.gps_active {
            GpsTimeLookup::Disabled
        } else {
            match self.state.gps_time_snapshot() {
                Some(tref) => GpsTimeLookup::Reference(tref),
                None => GpsTimeLookup::NoReference,
            }
        };

        let pkt = match txpk.to_tx_packet(gps_lookup) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("{e}, TX aborted");
                return;
            }
        };
        match pkt.mode {
            crate::hal::TxMode::Immediate => {
                debug!("a packet will be sent in immediate mode");
            }
            crate::hal::TxMode::Timestamped(count_us) => {
                debug!("a packet will be sent on timestamp value {count_us}");
            }
            crate::hal::TxMode::OnGps => {}
        }

        {
            // count only datagrams with no JSON errors
            let mut meas = self.state.meas_dw.lock();
            meas.dgram_rcv += 1;
            meas.network_byte += dgram_len as u32;
            meas.payload_byte += pkt.payload.len() as u32;
        }

        let sent = {
            let mut concentrator = self.state.concentrator.lock().await;
            concentrator.send(&pkt)
        };
        let mut meas = self.state.meas_dw.lock();
        match sent {
            Ok(()) => meas.nb_tx_ok += 1,
            Err(e) => {
                meas.nb_tx_fail += 1;
                drop(meas);
                warn!("concentrator send failed: {e}");
            }
        }
    }

    /// Emits the armed beacon when GPS and the crystal correction are both
    /// valid. Exactly one downstream worker consumes the flag.
    async fn beacon_check(&self, beacon: &mut BeaconBuilder) {
        let conf = &self.state.config.gateway;
        if !self.state.gps_active || !conf.beacon_enabled {
            return;
        }
        if !self.state.beacon_next_pps.load(Ordering::Relaxed) {
            return;
        }

        // the xtal validity snapshot is taken first so no two of the state
        // locks are ever held together
        let xtal_valid = self.state.xtal.lock().valid;
        let field_time = {
            let cell = self.state.time_ref.lock();
            if !self.state.beacon_next_pps.swap(false, Ordering::Relaxed) {
                return; // another worker took this beacon
            }
            if cell.valid && xtal_valid {
                // the beacon is prepared 1 sec before beacon time
                cell.anchor.map(|tref| (tref.utc.timestamp() + 1) as u32)
            } else {
                None
            }
        };
        let Some(field_time) = field_time else { return };

        let freq_hz = {
            let xtal = self.state.xtal.lock();
            (xtal.value * f64::from(conf.beacon_freq_hz)).round() as u32
        };
        let pkt = beacon.packet(field_time, freq_hz);
        info!("beacon ready to send (frequency {freq_hz} Hz)");

        let sent = {
            let mut concentrator = self.state.concentrator.lock().await;
            concentrator.send(&pkt)
        };
        if let Err(e) = sent {
            warn!("failed to send beacon packet: {e}");
            return;
        }

        // wait for the PPS trigger, polling with the concentrator released
        let mut status = TxStatus::Unknown;
        let polls = (BEACON_POLL_BUDGET.as_millis() / BEACON_POLL.as_millis()) as u32;
        for _ in 0..polls {
            tokio::time::sleep(BEACON_POLL).await;
            status = {
                let mut concentrator = self.state.concentrator.lock().await;
                concentrator.tx_status().unwrap_or(TxStatus::Unknown)
            };
            if status == TxStatus::Free {
                break;
            }
        }
        if status == TxStatus::Free {
            info!("beacon sent successfully");
        } else {
            warn!("beacon was scheduled but failed to TX");
        }
    }
}

/// Non-blocking check of the shutdown channel, polled at loop heads.
fn shutdown_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}
