// src/core/tasks/stats.rs

//! Periodic statistics collection: snapshots and resets the counter
//! bundles, logs the human-readable report, composes the `stat` JSON
//! fragment for the upstream fanout, and watches for unintended
//! concentrator resets.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::core::protocol::stat::StatusReport;
use crate::core::state::GatewayState;
use crate::hal::TRIGCNT_RESET_SENTINEL;
use crate::hal::gps::GpsCoords;

fn round5(v: f64) -> f64 {
    (v * 1.0e5).round() / 1.0e5
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn percent(part: u32, whole: u32) -> f64 {
    if whole > 0 {
        100.0 * f64::from(part) / f64::from(whole)
    } else {
        0.0
    }
}

pub struct StatsReporter {
    state: Arc<GatewayState>,
}

impl StatsReporter {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.state.config.gateway.stat_interval());
        interval.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                _ = interval.tick() => self.report_cycle().await?,
                _ = shutdown_rx.recv() => {
                    info!("stats reporter shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn report_cycle(&self) -> anyhow::Result<()> {
        let conf = &self.state.config.gateway;
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();

        let up = self.state.meas_up.lock().take();
        let dw = self.state.meas_dw.lock().take();

        let (mut coord_ok, mut coord) = if self.state.gps_active {
            let position = self.state.gps_position.lock();
            (position.valid, position.coords)
        } else {
            (false, GpsCoords::default())
        };
        // reference coordinates override the live fix if requested
        if conf.gps_fake_enable {
            coord_ok = true;
            coord = GpsCoords {
                latitude: conf.ref_latitude,
                longitude: conf.ref_longitude,
                altitude: conf.ref_altitude,
            };
        }

        self.log_report(&timestamp, &up, &dw, coord_ok, &coord);

        if conf.statusstream_enabled {
            let with_coords = conf.gps_enabled && coord_ok;
            let report = StatusReport {
                time: timestamp,
                lati: with_coords.then(|| round5(coord.latitude)),
                long: with_coords.then(|| round5(coord.longitude)),
                alti: with_coords.then_some(coord.altitude),
                rxnb: up.nb_rx_rcv,
                rxok: up.nb_rx_ok,
                rxfw: up.pkt_fwd,
                ackr: round1(percent(up.ack_rcv, up.dgram_sent)),
                dwnb: dw.dgram_rcv,
                txnb: dw.nb_tx_ok,
                pfrm: conf.platform.clone(),
                mail: conf.email.clone(),
                desc: conf.description.clone(),
            };
            *self.state.status_report.lock() = Some(report);
            self.state.report_ready.store(true, Ordering::Relaxed);
        }

        // a trigger counter stuck on the sentinel means the concentrator
        // went through an unintended reset
        if conf.radiostream_enabled {
            let trig_cnt = {
                let mut concentrator = self.state.concentrator.lock().await;
                concentrator.trig_cnt()
            };
            if let Ok(cnt) = trig_cnt
                && cnt == TRIGCNT_RESET_SENTINEL
            {
                return Err(anyhow!(
                    "unintended concentrator reset detected, terminating packet forwarder"
                ));
            }
        }
        Ok(())
    }

    fn log_report(
        &self,
        timestamp: &str,
        up: &crate::core::state::UpstreamMeasurements,
        dw: &crate::core::state::DownstreamMeasurements,
        coord_ok: bool,
        coord: &GpsCoords,
    ) {
        let conf = &self.state.config.gateway;
        info!("##### {timestamp} #####");
        info!("### [UPSTREAM] ###");
        info!("# RF packets received by concentrator: {}", up.nb_rx_rcv);
        info!(
            "# CRC_OK: {:.2}%, CRC_FAIL: {:.2}%, NO_CRC: {:.2}%",
            percent(up.nb_rx_ok, up.nb_rx_rcv),
            percent(up.nb_rx_bad, up.nb_rx_rcv),
            percent(up.nb_rx_nocrc, up.nb_rx_rcv)
        );
        info!("# RF packets forwarded: {} ({} bytes)", up.pkt_fwd, up.payload_byte);
        info!(
            "# PUSH_DATA datagrams sent: {} ({} bytes)",
            up.dgram_sent, up.network_byte
        );
        info!("# PUSH_DATA acknowledged: {:.2}%", percent(up.ack_rcv, up.dgram_sent));
        info!("### [DOWNSTREAM] ###");
        info!(
            "# PULL_DATA sent: {} ({:.2}% acknowledged)",
            dw.pull_sent,
            percent(dw.ack_rcv, dw.pull_sent)
        );
        info!(
            "# PULL_RESP datagrams received: {} ({} bytes)",
            dw.dgram_rcv, dw.network_byte
        );
        info!(
            "# RF packets sent to concentrator: {} ({} bytes)",
            dw.nb_tx_ok + dw.nb_tx_fail,
            dw.payload_byte
        );
        info!("# TX errors: {}", dw.nb_tx_fail);
        info!("### [GPS] ###");
        if conf.gps_enabled {
            let (ref_valid, age) = {
                let cell = self.state.time_ref.lock();
                (
                    cell.valid,
                    cell.anchor
                        .as_ref()
                        .and_then(|anchor| anchor.age())
                        .map(|age| age.as_secs()),
                )
            };
            match (ref_valid, age) {
                (true, Some(age)) => info!("# Valid gps time reference (age: {age} sec)"),
                (_, Some(age)) => info!("# Invalid gps time reference (age: {age} sec)"),
                _ => info!("# No gps time reference yet"),
            }
            if conf.gps_fake_enable {
                info!(
                    "# Manual GPS coordinates: latitude {:.5}, longitude {:.5}, altitude {} m",
                    coord.latitude, coord.longitude, coord.altitude
                );
            } else if coord_ok {
                info!(
                    "# System GPS coordinates: latitude {:.5}, longitude {:.5}, altitude {} m",
                    coord.latitude, coord.longitude, coord.altitude
                );
            } else {
                info!("# no valid GPS coordinates available yet");
            }
        } else {
            info!("# GPS sync is disabled");
        }
        info!("##### END #####");
    }
}
