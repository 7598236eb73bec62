// src/core/state/mod.rs

//! The central `GatewayState` struct, holding all shared forwarder state.
//!
//! One immutable shared context with several independently lockable cells
//! replaces the file-scope globals of classic packet forwarders. Locking
//! rules: never hold more than one of these locks at a time, with two
//! documented exceptions (the concentrator lock around `send`, and the
//! time-reference read-then-copy). The short-section locks are
//! `parking_lot` mutexes and must never be held across an `.await`.

pub mod measurements;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::{Config, ServerConf};
use crate::core::gps::{TimeRef, TimeRefCell};
use crate::core::protocol::Eui64;
use crate::core::protocol::stat::StatusReport;
use crate::core::registry::ServerRegistry;
use crate::hal::Concentrator;
use crate::hal::ghost::GhostStream;
use crate::hal::gps::GpsCoords;

pub use measurements::{DownstreamMeasurements, UpstreamMeasurements};

/// Number of initial crystal-error samples averaged into the first
/// correction value.
pub const XERR_INIT_AVG: u32 = 128;
/// Low-pass filter coefficient for crystal-error tracking.
pub const XERR_FILT_COEF: f64 = 256.0;

/// Reasons a worker may ask the process to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Too many consecutive unacknowledged PULL_DATA on one server.
    Autoquit,
}

/// Low-pass filtered crystal frequency correction applied to the beacon TX
/// frequency. Valid only while the GPS time reference is fresh.
#[derive(Debug)]
pub struct XtalCorrection {
    pub value: f64,
    pub valid: bool,
    init_acc: f64,
    init_cnt: u32,
}

impl Default for XtalCorrection {
    fn default() -> Self {
        Self {
            value: 1.0,
            valid: false,
            init_acc: 0.0,
            init_cnt: 0,
        }
    }
}

impl XtalCorrection {
    /// Drops back to the neutral correction and restarts the initial
    /// averaging from scratch.
    pub fn invalidate(&mut self) {
        self.value = 1.0;
        self.valid = false;
        self.init_acc = 0.0;
        self.init_cnt = 0;
    }

    /// Feeds one crystal-error sample: arithmetic mean over the first
    /// [`XERR_INIT_AVG`] samples, single-pole IIR tracking afterwards.
    pub fn update(&mut self, xtal_err: f64) {
        if self.init_cnt < XERR_INIT_AVG {
            self.init_acc += xtal_err;
            self.init_cnt += 1;
            if self.init_cnt == XERR_INIT_AVG {
                self.value = f64::from(XERR_INIT_AVG) / self.init_acc;
                self.valid = true;
            }
        } else {
            self.value = self.value - self.value / XERR_FILT_COEF + (1.0 / xtal_err) / XERR_FILT_COEF;
        }
    }
}

/// Gateway position shared between the GPS worker and the stats task.
#[derive(Debug, Default)]
pub struct GpsPosition {
    pub valid: bool,
    pub coords: GpsCoords,
}

/// Per-server socket slots. The connector publishes both sockets before it
/// marks the server started, so a started server always has valid sockets.
#[derive(Debug)]
pub struct ServerLink {
    pub conf: ServerConf,
    sock_up: OnceLock<Arc<UdpSocket>>,
    sock_down: OnceLock<Arc<UdpSocket>>,
}

impl ServerLink {
    fn new(conf: ServerConf) -> Self {
        Self {
            conf,
            sock_up: OnceLock::new(),
            sock_down: OnceLock::new(),
        }
    }

    pub fn publish(&self, up: UdpSocket, down: UdpSocket) {
        let _ = self.sock_up.set(Arc::new(up));
        let _ = self.sock_down.set(Arc::new(down));
    }

    pub fn up(&self) -> Option<Arc<UdpSocket>> {
        self.sock_up.get().cloned()
    }

    pub fn down(&self) -> Option<Arc<UdpSocket>> {
        self.sock_down.get().cloned()
    }
}

/// The central struct holding all shared forwarder state, wrapped in an
/// `Arc` and handed to every worker.
pub struct GatewayState {
    /// Runtime configuration, immutable after startup.
    pub config: Arc<Config>,
    /// Gateway unique identifier sent in every datagram header.
    pub eui: Eui64,
    /// The concentrator driver. Held across every HAL call; a tokio mutex
    /// because it is acquired from async context and may be re-acquired
    /// between beacon status polls.
    pub concentrator: tokio::sync::Mutex<Box<dyn Concentrator>>,
    /// Ghost frame buffer, present when the ghost stream is enabled.
    pub ghost: Option<GhostStream>,
    /// Per-server lifecycle registry.
    pub registry: ServerRegistry,
    /// Per-server socket slots, index-aligned with the registry.
    pub links: Vec<ServerLink>,
    /// GPS time reference cell.
    pub time_ref: Mutex<TimeRefCell>,
    /// Crystal frequency correction.
    pub xtal: Mutex<XtalCorrection>,
    /// Upstream statistics bundle.
    pub meas_up: Mutex<UpstreamMeasurements>,
    /// Downstream statistics bundle.
    pub meas_dw: Mutex<DownstreamMeasurements>,
    /// Last known gateway position.
    pub gps_position: Mutex<GpsPosition>,
    /// Status report composed by the stats task.
    pub status_report: Mutex<Option<StatusReport>>,
    /// True when `status_report` holds a report not yet sent upstream.
    /// Single writer (stats task), single reader (upstream fanout), so the
    /// upstream path may read it without taking the report lock.
    pub report_ready: AtomicBool,
    /// Armed by the GPS worker when the coming PPS matches the beacon cycle
    /// phase; consumed by exactly one downstream worker.
    pub beacon_next_pps: AtomicBool,
    /// True when a GPS backend is present and the stream is enabled.
    pub gps_active: bool,
    exit_tx: mpsc::Sender<ExitReason>,
}

impl GatewayState {
    /// Builds the shared context. The returned receiver surfaces worker
    /// initiated process-exit requests (autoquit) to the supervisor.
    pub fn new(
        config: Arc<Config>,
        concentrator: Box<dyn Concentrator>,
        ghost: Option<GhostStream>,
        gps_active: bool,
    ) -> (Arc<Self>, mpsc::Receiver<ExitReason>) {
        let (exit_tx, exit_rx) = mpsc::channel(1);
        let links: Vec<ServerLink> = config
            .gateway
            .servers
            .iter()
            .cloned()
            .map(ServerLink::new)
            .collect();
        let state = Arc::new(Self {
            eui: config.gateway.gateway_id,
            registry: ServerRegistry::new(links.len()),
            links,
            concentrator: tokio::sync::Mutex::new(concentrator),
            ghost,
            time_ref: Mutex::new(TimeRefCell::default()),
            xtal: Mutex::new(XtalCorrection::default()),
            meas_up: Mutex::new(UpstreamMeasurements::default()),
            meas_dw: Mutex::new(DownstreamMeasurements::default()),
            gps_position: Mutex::new(GpsPosition::default()),
            status_report: Mutex::new(None),
            report_ready: AtomicBool::new(false),
            beacon_next_pps: AtomicBool::new(false),
            gps_active,
            config,
            exit_tx,
        });
        (state, exit_rx)
    }

    /// Snapshot of the time reference, `Some` only while it is valid.
    pub fn gps_time_snapshot(&self) -> Option<TimeRef> {
        let cell = self.time_ref.lock();
        if cell.valid { cell.anchor } else { None }
    }

    /// Asks the supervisor to terminate the process.
    pub fn request_exit(&self, reason: ExitReason) {
        // a full channel means an exit is already underway
        let _ = self.exit_tx.try_send(reason);
    }
}
