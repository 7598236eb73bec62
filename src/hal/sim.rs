// src/hal/sim.rs

//! Software concentrator backend.
//!
//! Used when the gateway runs without a radio board (ghost-only or
//! status-only deployments) and by the test suite. It accepts the radio
//! section of the configuration like a hardware driver would, never yields
//! radio frames, and reports every transmission as completed.

use std::time::Instant;

use tracing::{debug, info};

use super::{Concentrator, RxPacket, TxPacket, TxStatus};
use crate::core::errors::FwdError;

pub struct SimConcentrator {
    radio_conf: serde_json::Value,
    started: bool,
    epoch: Instant,
}

impl SimConcentrator {
    pub fn new(radio_conf: serde_json::Value) -> Self {
        Self {
            radio_conf,
            started: false,
            epoch: Instant::now(),
        }
    }

    /// Free-running microsecond counter, wrapping like the hardware one.
    fn count_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }
}

impl Concentrator for SimConcentrator {
    fn start(&mut self) -> Result<(), FwdError> {
        if self.started {
            return Err(FwdError::Hal("concentrator already started".into()));
        }
        info!(
            "simulated concentrator started ({} radio keys ignored)",
            self.radio_conf
                .as_object()
                .map(|o| o.len())
                .unwrap_or_default()
        );
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FwdError> {
        self.started = false;
        Ok(())
    }

    fn receive(&mut self, _max: usize) -> Result<Vec<RxPacket>, FwdError> {
        Ok(Vec::new())
    }

    fn send(&mut self, pkt: &TxPacket) -> Result<(), FwdError> {
        debug!(
            freq_hz = pkt.freq_hz,
            size = pkt.payload.len(),
            "simulated TX"
        );
        Ok(())
    }

    fn tx_status(&mut self) -> Result<TxStatus, FwdError> {
        Ok(TxStatus::Free)
    }

    fn trig_cnt(&mut self) -> Result<u32, FwdError> {
        Ok(self.count_us())
    }
}
