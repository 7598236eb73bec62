// src/core/gps.rs

//! GPS time discipline: the PPS-anchored time reference and the worker that
//! keeps it in sync from NMEA traffic.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::errors::FwdError;
use crate::core::state::GatewayState;
use crate::hal::gps::{GpsPort, NmeaSentence};

/// Maximum admitted age of the last GPS sync before the reference is
/// considered unusable.
pub const GPS_REF_MAX_AGE: Duration = Duration::from_secs(30);

/// Window around 1.0 outside of which a measured crystal error is treated as
/// an aberrant sync and rejected.
const XTAL_ERR_PLAUSIBILITY: f64 = 0.01;

/// Snapshot anchoring the concentrator counter to UTC, taken on a PPS edge.
/// Consumers copy it out under the time-reference lock and convert through
/// the copy; staleness is always computed by the reader, never written back.
#[derive(Debug, Clone, Copy)]
pub struct TimeRef {
    /// System time when this anchor was captured, for age computation.
    pub systime: SystemTime,
    /// Concentrator counter latched on the PPS edge.
    pub count_us: u32,
    /// UTC time of that PPS edge.
    pub utc: DateTime<Utc>,
    /// Ratio of observed to ideal counter advance per second.
    pub xtal_err: f64,
}

impl TimeRef {
    /// Derives a new anchor from a PPS capture. With a previous anchor the
    /// crystal error is measured from the counter/UTC slopes and the sync is
    /// rejected as aberrant when it falls outside the plausibility window,
    /// keeping the previous anchor in use.
    pub fn sync(
        prev: Option<&TimeRef>,
        trig_cnt: u32,
        utc: DateTime<Utc>,
    ) -> Result<TimeRef, FwdError> {
        let xtal_err = match prev {
            None => 1.0,
            Some(prev) => {
                let cnt_diff = f64::from(trig_cnt.wrapping_sub(prev.count_us)) / 1.0e6;
                let utc_diff = (utc - prev.utc)
                    .num_microseconds()
                    .ok_or_else(|| FwdError::Gps("UTC step too large".to_string()))?
                    as f64
                    / 1.0e6;
                if utc_diff <= 0.0 {
                    return Err(FwdError::Gps("UTC did not advance since last sync".to_string()));
                }
                let err = cnt_diff / utc_diff;
                if (err - 1.0).abs() > XTAL_ERR_PLAUSIBILITY {
                    return Err(FwdError::Gps(format!("aberrant crystal error {err}")));
                }
                err
            }
        };
        Ok(TimeRef {
            systime: SystemTime::now(),
            count_us: trig_cnt,
            utc,
            xtal_err,
        })
    }

    /// Converts a concentrator counter value to UTC through this anchor.
    /// The counter wraps every ~71 minutes; the value is interpreted as the
    /// instant closest to the anchor.
    pub fn cnt2utc(&self, count_us: u32) -> Result<DateTime<Utc>, FwdError> {
        let ticks = count_us.wrapping_sub(self.count_us) as i32;
        let micros = (f64::from(ticks) / self.xtal_err).round() as i64;
        Ok(self.utc + chrono::Duration::microseconds(micros))
    }

    /// Converts a UTC instant to the concentrator counter value at which it
    /// occurs, for timestamped transmission scheduling.
    pub fn utc2cnt(&self, utc: DateTime<Utc>) -> Result<u32, FwdError> {
        let micros = (utc - self.utc)
            .num_microseconds()
            .ok_or_else(|| FwdError::Gps("target UTC too far from reference".to_string()))?;
        let ticks = (micros as f64 * self.xtal_err).round() as i64;
        Ok(self.count_us.wrapping_add(ticks as u32))
    }

    /// Age of this anchor; `None` when the system clock moved backwards.
    pub fn age(&self) -> Option<Duration> {
        self.systime.elapsed().ok()
    }
}

/// Lockable cell holding the current anchor. `valid` is maintained by the
/// XTAL validator on its one-second cadence; the GPS worker only replaces
/// the anchor.
#[derive(Debug, Default)]
pub struct TimeRefCell {
    pub valid: bool,
    pub anchor: Option<TimeRef>,
}

/// Worker reading the GPS port and refreshing the shared time reference and
/// position on every RMC sentence.
pub struct GpsWorker {
    state: Arc<GatewayState>,
    port: Box<dyn GpsPort>,
}

impl GpsWorker {
    pub fn new(state: Arc<GatewayState>, port: Box<dyn GpsPort>) -> Self {
        Self { state, port }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("GPS worker started");
        loop {
            let sentence = tokio::select! {
                res = self.port.read_sentence() => res,
                _ = shutdown_rx.recv() => {
                    info!("GPS worker shutting down");
                    return;
                }
            };
            match sentence {
                Ok(NmeaSentence::Rmc) => self.on_rmc().await,
                Ok(_) => {}
                Err(e) => {
                    warn!("GPS read failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn on_rmc(&mut self) {
        let Some(utc) = self.port.last_utc() else {
            warn!("could not get UTC time from GPS");
            return;
        };

        // arm the beacon when the coming PPS lands on the cycle offset
        let conf = &self.state.config.gateway;
        if conf.beacon_period > 0 {
            let sec_of_cycle = (utc.timestamp() + 1).rem_euclid(i64::from(conf.beacon_period));
            self.state
                .beacon_next_pps
                .store(sec_of_cycle == i64::from(conf.beacon_offset), Ordering::Relaxed);
        }

        let trig_cnt = {
            let mut concentrator = self.state.concentrator.lock().await;
            match concentrator.trig_cnt() {
                Ok(cnt) => cnt,
                Err(e) => {
                    warn!("failed to read PPS-latched counter: {e}");
                    return;
                }
            }
        };

        {
            let mut cell = self.state.time_ref.lock();
            match TimeRef::sync(cell.anchor.as_ref(), trig_cnt, utc) {
                Ok(anchor) => cell.anchor = Some(anchor),
                Err(e) => {
                    warn!("GPS out of sync, keeping previous time reference: {e}");
                    return;
                }
            }
        }

        let fix = self.port.last_fix();
        let mut position = self.state.gps_position.lock();
        match fix {
            Some(coords) => {
                position.valid = true;
                position.coords = coords;
            }
            None => position.valid = false,
        }
    }
}
