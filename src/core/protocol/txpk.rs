// src/core/protocol/txpk.rs

//! JSON schema of a `PULL_RESP` body and its conversion into a TX request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{Datr, parse_codr, parse_lora_datr};
use crate::core::errors::FwdError;
use crate::core::gps::TimeRef;
use crate::hal::{Bandwidth, CodingRate, DataRate, TxMode, TxPacket};

/// Minimum LoRa preamble length accepted for downlinks.
pub const MIN_LORA_PREAMBLE: u16 = 6;
/// Default LoRa preamble length when the server omits it.
pub const STD_LORA_PREAMBLE: u16 = 8;
/// Minimum FSK preamble length accepted for downlinks.
pub const MIN_FSK_PREAMBLE: u16 = 3;
/// Default FSK preamble length when the server omits it.
pub const STD_FSK_PREAMBLE: u16 = 4;

/// Complete `PULL_RESP` body.
#[derive(Debug, Deserialize)]
pub struct PullResp {
    pub txpk: TxPk,
}

/// The `txpk` object as sent by a network server. Everything is optional at
/// the serde layer; mandatory-field enforcement happens in
/// [`TxPk::to_tx_packet`] so that each missing field gets its own warning,
/// mirroring the per-field abort behavior of the protocol.
#[derive(Debug, Default, Deserialize)]
pub struct TxPk {
    #[serde(default)]
    pub imme: bool,
    pub tmst: Option<u32>,
    pub time: Option<String>,
    pub freq: Option<f64>,
    pub rfch: Option<u8>,
    pub powe: Option<i8>,
    pub modu: Option<String>,
    pub datr: Option<Datr>,
    pub codr: Option<String>,
    pub fdev: Option<f64>,
    pub ipol: Option<bool>,
    pub prea: Option<u16>,
    pub ncrc: Option<bool>,
    pub size: Option<u16>,
    pub data: Option<String>,
}

/// Availability of the GPS time reference for UTC-scheduled downlinks.
#[derive(Debug, Clone, Copy)]
pub enum GpsTimeLookup {
    /// GPS stream not active on this gateway.
    Disabled,
    /// GPS active but the reference is missing or stale.
    NoReference,
    /// A fresh reference snapshot.
    Reference(TimeRef),
}

impl TxPk {
    /// True when scheduling will require the GPS time reference; lets the
    /// caller skip the time-reference lock otherwise.
    pub fn needs_gps_time(&self) -> bool {
        !self.imme && self.tmst.is_none()
    }

    /// Validates the request and builds the concentrator TX descriptor.
    /// Any missing mandatory field, malformed value or unusable time source
    /// rejects this one downlink.
    pub fn to_tx_packet(&self, gps: GpsTimeLookup) -> Result<TxPacket, FwdError> {
        let mut pkt = TxPacket::default();

        pkt.mode = if self.imme {
            TxMode::Immediate
        } else if let Some(tmst) = self.tmst {
            TxMode::Timestamped(tmst)
        } else {
            let time = self
                .time
                .as_deref()
                .ok_or_else(|| missing("txpk.tmst or txpk.time"))?;
            let tref = match gps {
                GpsTimeLookup::Disabled => {
                    return Err(FwdError::Downlink(
                        "GPS disabled, cannot send on UTC time".to_string(),
                    ));
                }
                GpsTimeLookup::NoReference => {
                    return Err(FwdError::Downlink(
                        "no valid GPS time reference yet, cannot send on UTC time".to_string(),
                    ));
                }
                GpsTimeLookup::Reference(tref) => tref,
            };
            let utc = parse_utc(time)?;
            let count_us = tref.utc2cnt(utc)?;
            TxMode::Timestamped(count_us)
        };

        pkt.no_crc = self.ncrc.unwrap_or(false);
        let freq = self.freq.ok_or_else(|| missing("txpk.freq"))?;
        pkt.freq_hz = (freq * 1.0e6) as u32;
        pkt.rf_chain = self.rfch.ok_or_else(|| missing("txpk.rfch"))?;
        if let Some(powe) = self.powe {
            pkt.rf_power = powe;
        }

        match self.modu.as_deref().ok_or_else(|| missing("txpk.modu"))? {
            "LORA" => {
                let datr = self.datr.as_ref().ok_or_else(|| missing("txpk.datr"))?;
                let (sf, bw) = match datr {
                    Datr::Lora(s) => parse_lora_datr(s)
                        .map_err(|e| FwdError::Downlink(e.to_string()))?,
                    Datr::Fsk(_) => {
                        return Err(FwdError::Downlink(
                            "txpk.datr must be a LoRa identifier".to_string(),
                        ));
                    }
                };
                pkt.datarate = DataRate::Lora(sf);
                pkt.bandwidth = bw;
                let codr = self.codr.as_deref().ok_or_else(|| missing("txpk.codr"))?;
                pkt.coderate = parse_codr(codr).map_err(|e| FwdError::Downlink(e.to_string()))?;
                pkt.invert_pol = self.ipol.unwrap_or(false);
                pkt.preamble = match self.prea {
                    Some(p) => p.max(MIN_LORA_PREAMBLE),
                    None => STD_LORA_PREAMBLE,
                };
            }
            "FSK" => {
                let datr = self.datr.as_ref().ok_or_else(|| missing("txpk.datr"))?;
                pkt.datarate = match datr {
                    Datr::Fsk(bps) => DataRate::Fsk(*bps),
                    Datr::Lora(_) => {
                        return Err(FwdError::Downlink(
                            "txpk.datr must be a bitrate for FSK".to_string(),
                        ));
                    }
                };
                let fdev = self.fdev.ok_or_else(|| missing("txpk.fdev"))?;
                // wire value in Hz, hardware wants kHz
                pkt.f_dev_khz = (fdev / 1000.0) as u8;
                pkt.preamble = match self.prea {
                    Some(p) => p.max(MIN_FSK_PREAMBLE),
                    None => STD_FSK_PREAMBLE,
                };
            }
            other => {
                return Err(FwdError::Downlink(format!(
                    "invalid modulation {other:?} in txpk.modu"
                )));
            }
        }

        let size = self.size.ok_or_else(|| missing("txpk.size"))?;
        let data = self.data.as_deref().ok_or_else(|| missing("txpk.data"))?;
        pkt.payload = STANDARD
            .decode(data)
            .map_err(|e| FwdError::Downlink(format!("bad base64 in txpk.data: {e}")))?;
        if pkt.payload.len() != usize::from(size) {
            warn!(
                declared = size,
                decoded = pkt.payload.len(),
                "mismatch between txpk.size and decoded txpk.data length"
            );
        }

        Ok(pkt)
    }
}

fn missing(field: &str) -> FwdError {
    FwdError::Downlink(format!("no mandatory {field:?} field in JSON"))
}

/// Parses the ISO 8601 `time` field, with or without an explicit offset.
fn parse_utc(s: &str) -> Result<DateTime<Utc>, FwdError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| FwdError::Downlink(format!("txpk.time {s:?} is not ISO 8601")))
}
