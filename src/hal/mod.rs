// src/hal/mod.rs

//! Hardware abstraction seam for the LoRa concentrator and the GPS receiver.
//!
//! The forwarder core never talks to hardware directly: it drives the
//! [`Concentrator`] and [`GpsPort`] traits defined here. The in-tree
//! [`sim::SimConcentrator`] backend is used when no radio board is present;
//! hardware integrations provide their own implementations and hand them to
//! `server::run` through [`Deps`].

pub mod ghost;
pub mod gps;
pub mod sim;

use crate::core::errors::FwdError;

/// Max number of packets fetched from the concentrator per cycle.
pub const NB_PKT_MAX: usize = 8;

/// LoRa spreading factor, SF7 through SF12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadingFactor {
    Sf7,
    Sf8,
    Sf9,
    Sf10,
    Sf11,
    Sf12,
}

impl SpreadingFactor {
    pub fn from_sf(sf: u8) -> Option<Self> {
        match sf {
            7 => Some(Self::Sf7),
            8 => Some(Self::Sf8),
            9 => Some(Self::Sf9),
            10 => Some(Self::Sf10),
            11 => Some(Self::Sf11),
            12 => Some(Self::Sf12),
            _ => None,
        }
    }

    pub fn as_sf(self) -> u8 {
        match self {
            Self::Sf7 => 7,
            Self::Sf8 => 8,
            Self::Sf9 => 9,
            Self::Sf10 => 10,
            Self::Sf11 => 11,
            Self::Sf12 => 12,
        }
    }
}

/// Modulation bandwidth of a LoRa channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    pub fn from_khz(khz: u16) -> Option<Self> {
        match khz {
            125 => Some(Self::Khz125),
            250 => Some(Self::Khz250),
            500 => Some(Self::Khz500),
            _ => None,
        }
    }

    pub fn as_khz(self) -> u16 {
        match self {
            Self::Khz125 => 125,
            Self::Khz250 => 250,
            Self::Khz500 => 500,
        }
    }
}

/// LoRa forward error-correction coding rate. `Off` covers CR0 frames
/// reported by the concentrator on false syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
    Off,
}

/// Datarate of a frame; carries the modulation with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    /// LoRa spreading factor.
    Lora(SpreadingFactor),
    /// FSK bitrate in bits per second.
    Fsk(u32),
}

/// Payload CRC status reported by the concentrator for a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Ok,
    Bad,
    NoCrc,
    /// Anything else the hardware may report; logged and dropped upstream.
    Unknown(u8),
}

/// One uplink frame as fetched from the concentrator (or the ghost source).
#[derive(Debug, Clone)]
pub struct RxPacket {
    /// Concentrator counter value at the end of reception, in microseconds.
    pub count_us: u32,
    /// IF chain (logical channel) the frame was received on.
    pub if_chain: u8,
    /// RF chain (radio front-end) the frame was received on.
    pub rf_chain: u8,
    /// RX center frequency in Hz.
    pub freq_hz: u32,
    pub crc: CrcStatus,
    pub datarate: DataRate,
    pub bandwidth: Bandwidth,
    pub coderate: CodingRate,
    /// Average RSSI in dBm.
    pub rssi: f32,
    /// Average SNR in dB, meaningful for LoRa only.
    pub snr: f32,
    pub payload: Vec<u8>,
}

/// When the concentrator should emit a downlink frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// As soon as possible.
    Immediate,
    /// When the internal counter reaches the given microsecond value.
    Timestamped(u32),
    /// On the next GPS PPS edge (beacons).
    OnGps,
}

/// One downlink frame handed to the concentrator, mirroring the fields the
/// hardware scheduler consumes.
#[derive(Debug, Clone)]
pub struct TxPacket {
    pub mode: TxMode,
    pub freq_hz: u32,
    pub rf_chain: u8,
    /// TX power in dBm; 0 lets the driver pick its table default.
    pub rf_power: i8,
    pub datarate: DataRate,
    pub bandwidth: Bandwidth,
    pub coderate: CodingRate,
    /// Invert signal polarity (LoRa downlink convention).
    pub invert_pol: bool,
    /// FSK frequency deviation in kHz; unused for LoRa.
    pub f_dev_khz: u8,
    pub preamble: u16,
    pub no_crc: bool,
    /// Implicit-header mode (beacons).
    pub no_header: bool,
    pub payload: Vec<u8>,
}

impl Default for TxPacket {
    fn default() -> Self {
        Self {
            mode: TxMode::Immediate,
            freq_hz: 0,
            rf_chain: 0,
            rf_power: 0,
            datarate: DataRate::Lora(SpreadingFactor::Sf7),
            bandwidth: Bandwidth::Khz125,
            coderate: CodingRate::Cr4_5,
            invert_pol: false,
            f_dev_khz: 0,
            preamble: 0,
            no_crc: false,
            no_header: false,
            payload: Vec::new(),
        }
    }
}

/// State of the concentrator TX path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Free,
    Scheduled,
    Emitting,
    Unknown,
}

/// Sentinel value read back from the trigger counter after an unintended
/// concentrator reset.
pub const TRIGCNT_RESET_SENTINEL: u32 = 0x7E00_0000;

/// The concentrator driver seam. All calls are made with the shared
/// concentrator lock held, so implementations need not synchronize
/// internally.
pub trait Concentrator: Send {
    /// Apply the radio configuration and start the RF front-ends.
    fn start(&mut self) -> Result<(), FwdError>;

    /// Stop the RF front-ends and release the board.
    fn stop(&mut self) -> Result<(), FwdError>;

    /// Fetch up to `max` received frames. An `Err` here is a hard failure
    /// and terminates the forwarder.
    fn receive(&mut self, max: usize) -> Result<Vec<RxPacket>, FwdError>;

    /// Queue one frame for transmission.
    fn send(&mut self, pkt: &TxPacket) -> Result<(), FwdError>;

    /// Poll the TX path state.
    fn tx_status(&mut self) -> Result<TxStatus, FwdError>;

    /// Read the counter value latched on the last PPS edge.
    fn trig_cnt(&mut self) -> Result<u32, FwdError>;
}

/// External collaborators injected into `server::run`. Hardware builds
/// supply their own concentrator and GPS backends here.
pub struct Deps {
    pub concentrator: Box<dyn Concentrator>,
    pub gps: Option<Box<dyn gps::GpsPort>>,
}
