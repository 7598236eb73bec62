// src/hal/gps.rs

//! Seam for the GPS receiver: serial access and NMEA parsing stay behind
//! [`GpsPort`]; the forwarder only consumes parsed sentences, the UTC
//! solution and the position fix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::errors::FwdError;

/// NMEA sentence kinds the forwarder reacts to. Time synchronization is
/// triggered on RMC frames only; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmeaSentence {
    Rmc,
    Gga,
    Other,
}

/// Gateway position as resolved by the GPS receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsCoords {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: i32,
}

/// A GPS receiver attached over a serial port.
///
/// `read_sentence` blocks until one NMEA sentence has been consumed from the
/// port and reports its kind; the parsed UTC solution and fix are then
/// available through the accessors until the next sentence overwrites them.
#[async_trait]
pub trait GpsPort: Send {
    async fn read_sentence(&mut self) -> Result<NmeaSentence, FwdError>;

    /// UTC time of the last PPS-aligned solution, if the receiver has one.
    fn last_utc(&self) -> Option<DateTime<Utc>>;

    /// Last position fix, if the receiver has one.
    fn last_fix(&self) -> Option<GpsCoords>;
}
