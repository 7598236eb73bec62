// src/core/protocol/rxpk.rs

//! JSON schema of one received frame inside a `PUSH_DATA` body.

use serde::{Deserialize, Serialize};

use super::{Datr, Modulation, format_codr, format_lora_datr, parse_codr, parse_lora_datr};
use crate::core::errors::FwdError;
use crate::hal::{CodingRate, CrcStatus, DataRate, RxPacket};

/// One `rxpk` array entry. Field order matches the wire convention; numeric
/// fields hold already-rounded values so the JSON carries the documented
/// precision (freq 6 decimals, lsnr 1 decimal, rssi integer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxPk {
    pub tmst: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub chan: u8,
    pub rfch: u8,
    pub freq: f64,
    pub stat: i8,
    pub modu: Modulation,
    pub datr: Datr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsnr: Option<f64>,
    pub rssi: i16,
    pub size: u16,
    #[serde(with = "super::base64_bytes")]
    pub data: Vec<u8>,
}

impl RxPk {
    /// Builds the wire entry for a fetched frame. `time` is the optional
    /// GPS-derived (or local-clock fallback) RX time, already formatted.
    pub fn from_packet(p: &RxPacket, time: Option<String>) -> Self {
        let stat = match p.crc {
            CrcStatus::Ok => 1,
            CrcStatus::Bad => -1,
            // unknown statuses never reach serialization, the filter drops them
            CrcStatus::NoCrc | CrcStatus::Unknown(_) => 0,
        };
        let (modu, datr, codr, lsnr) = match p.datarate {
            DataRate::Lora(sf) => (
                Modulation::Lora,
                Datr::Lora(format_lora_datr(sf, p.bandwidth)),
                Some(format_codr(p.coderate).to_string()),
                Some((f64::from(p.snr) * 10.0).round() / 10.0),
            ),
            DataRate::Fsk(bps) => (Modulation::Fsk, Datr::Fsk(bps), None, None),
        };
        Self {
            tmst: p.count_us,
            time,
            chan: p.if_chain,
            rfch: p.rf_chain,
            freq: f64::from(p.freq_hz) / 1.0e6,
            stat,
            modu,
            datr,
            codr,
            lsnr,
            rssi: p.rssi.round() as i16,
            size: p.payload.len() as u16,
            data: p.payload.clone(),
        }
    }

    /// Reverses the mapping for frames injected through the ghost stream.
    pub fn into_packet(self) -> Result<RxPacket, FwdError> {
        let crc = match self.stat {
            1 => CrcStatus::Ok,
            -1 => CrcStatus::Bad,
            0 => CrcStatus::NoCrc,
            other => {
                return Err(FwdError::Protocol(format!("bad stat value {other}")));
            }
        };
        let (datarate, bandwidth, coderate) = match (self.modu, &self.datr) {
            (Modulation::Lora, Datr::Lora(s)) => {
                let (sf, bw) = parse_lora_datr(s)?;
                let cr = self
                    .codr
                    .as_deref()
                    .map(parse_codr)
                    .transpose()?
                    .unwrap_or(CodingRate::Cr4_5);
                (DataRate::Lora(sf), bw, cr)
            }
            (Modulation::Fsk, Datr::Fsk(bps)) => {
                (DataRate::Fsk(*bps), crate::hal::Bandwidth::Khz125, CodingRate::Off)
            }
            _ => {
                return Err(FwdError::Protocol(
                    "modu and datr fields disagree".to_string(),
                ));
            }
        };
        Ok(RxPacket {
            count_us: self.tmst,
            if_chain: self.chan,
            rf_chain: self.rfch,
            freq_hz: (self.freq * 1.0e6).round() as u32,
            crc,
            datarate,
            bandwidth,
            coderate,
            rssi: f64::from(self.rssi) as f32,
            snr: self.lsnr.unwrap_or_default() as f32,
            payload: self.data,
        })
    }
}
