// tests/common/mod.rs

//! Shared fixtures: a scriptable mock concentrator and helpers to build a
//! gateway state around it.

#![allow(dead_code)] // not every test crate uses every fixture

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use lorafwd::config::{Config, GatewayConf, ServerConf};
use lorafwd::core::errors::FwdError;
use lorafwd::core::state::{ExitReason, GatewayState};
use lorafwd::hal::{
    Bandwidth, CodingRate, Concentrator, CrcStatus, DataRate, RxPacket, SpreadingFactor,
    TxPacket, TxStatus,
};

/// Observable state of the mock concentrator, shared with the test body.
#[derive(Default)]
pub struct MockLog {
    pub rx_queue: VecDeque<RxPacket>,
    pub sent: Vec<TxPacket>,
    pub trig_cnt: u32,
    pub started: bool,
    pub receive_calls: u32,
    pub fail_receive: bool,
    pub fail_send: bool,
}

pub struct MockConcentrator {
    log: Arc<Mutex<MockLog>>,
}

impl Concentrator for MockConcentrator {
    fn start(&mut self) -> Result<(), FwdError> {
        self.log.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FwdError> {
        self.log.lock().started = false;
        Ok(())
    }

    fn receive(&mut self, max: usize) -> Result<Vec<RxPacket>, FwdError> {
        let mut log = self.log.lock();
        log.receive_calls += 1;
        if log.fail_receive {
            return Err(FwdError::Hal("mock fetch failure".to_string()));
        }
        let n = log.rx_queue.len().min(max);
        Ok(log.rx_queue.drain(..n).collect())
    }

    fn send(&mut self, pkt: &TxPacket) -> Result<(), FwdError> {
        let mut log = self.log.lock();
        if log.fail_send {
            return Err(FwdError::Hal("mock send failure".to_string()));
        }
        log.sent.push(pkt.clone());
        Ok(())
    }

    fn tx_status(&mut self) -> Result<TxStatus, FwdError> {
        Ok(TxStatus::Free)
    }

    fn trig_cnt(&mut self) -> Result<u32, FwdError> {
        Ok(self.log.lock().trig_cnt)
    }
}

/// Builds a mock concentrator plus the handle observing it.
pub fn mock_concentrator() -> (Box<dyn Concentrator>, Arc<Mutex<MockLog>>) {
    let log = Arc::new(Mutex::new(MockLog::default()));
    (Box::new(MockConcentrator { log: log.clone() }), log)
}

/// Gateway configuration from a JSON fragment; unspecified keys take their
/// defaults.
pub fn gateway_conf(overrides: serde_json::Value) -> GatewayConf {
    serde_json::from_value(overrides).expect("valid gateway_conf fragment")
}

/// One enabled loopback server entry. The ports are placeholders: tests
/// publish pre-connected sockets instead of running the connector.
pub fn loopback_server() -> ServerConf {
    serde_json::from_value(serde_json::json!({
        "server_address": "127.0.0.1",
        "serv_port_up": 1780,
        "serv_port_down": 1782,
    }))
    .expect("valid server entry")
}

/// Assembles a gateway state around a mock concentrator.
pub fn test_state(
    mut gateway: GatewayConf,
    servers: Vec<ServerConf>,
) -> (
    Arc<GatewayState>,
    mpsc::Receiver<ExitReason>,
    Arc<Mutex<MockLog>>,
) {
    gateway.servers = servers;
    let config = Arc::new(Config {
        gateway,
        radio: serde_json::json!({}),
    });
    let (concentrator, log) = mock_concentrator();
    let (state, exit_rx) = GatewayState::new(config, concentrator, None, false);
    (state, exit_rx, log)
}

/// A CRC-OK SF9/BW125 LoRa uplink used across the upstream tests.
pub fn lora_packet(count_us: u32, payload: Vec<u8>) -> RxPacket {
    RxPacket {
        count_us,
        if_chain: 2,
        rf_chain: 0,
        freq_hz: 868_100_000,
        crc: CrcStatus::Ok,
        datarate: DataRate::Lora(SpreadingFactor::Sf9),
        bandwidth: Bandwidth::Khz125,
        coderate: CodingRate::Cr4_5,
        rssi: -35.0,
        snr: 9.5,
        payload,
    }
}
