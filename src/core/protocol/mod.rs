// src/core/protocol/mod.rs

//! Semtech UDP packet-forwarder protocol, version 1.
//!
//! Every datagram starts with a 12-byte header (version, random token,
//! command, gateway EUI); `PUSH_DATA` and `PULL_RESP` carry a UTF-8 JSON
//! body after it. The JSON schemas live in [`rxpk`], [`txpk`] and [`stat`].

pub mod header;
pub mod rxpk;
pub mod stat;
pub mod txpk;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::FwdError;
use crate::hal::{Bandwidth, CodingRate, SpreadingFactor};

pub use header::{Command, Eui64, Header, PROTOCOL_VERSION};

/// Wire form of the `modu` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modulation {
    Lora,
    Fsk,
}

/// Wire form of the `datr` field: a `"SF{n}BW{bw}"` string for LoRa, a bare
/// bitrate for FSK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datr {
    Fsk(u32),
    Lora(String),
}

/// Formats a LoRa datarate identifier, e.g. `SF9BW125`.
pub fn format_lora_datr(sf: SpreadingFactor, bw: Bandwidth) -> String {
    format!("SF{}BW{}", sf.as_sf(), bw.as_khz())
}

/// Parses a LoRa datarate identifier of the form `SF{n}BW{bw}`.
pub fn parse_lora_datr(s: &str) -> Result<(SpreadingFactor, Bandwidth), FwdError> {
    let rest = s
        .strip_prefix("SF")
        .ok_or_else(|| FwdError::Protocol(format!("bad datr {s:?}")))?;
    let (sf_str, bw_str) = rest
        .split_once("BW")
        .ok_or_else(|| FwdError::Protocol(format!("bad datr {s:?}")))?;
    let sf = sf_str
        .parse::<u8>()
        .ok()
        .and_then(SpreadingFactor::from_sf)
        .ok_or_else(|| FwdError::Protocol(format!("invalid SF in datr {s:?}")))?;
    let bw = bw_str
        .parse::<u16>()
        .ok()
        .and_then(Bandwidth::from_khz)
        .ok_or_else(|| FwdError::Protocol(format!("invalid BW in datr {s:?}")))?;
    Ok((sf, bw))
}

/// Formats a coding rate identifier, e.g. `4/5`. `OFF` marks CR0 frames.
pub fn format_codr(cr: CodingRate) -> &'static str {
    match cr {
        CodingRate::Cr4_5 => "4/5",
        CodingRate::Cr4_6 => "4/6",
        CodingRate::Cr4_7 => "4/7",
        CodingRate::Cr4_8 => "4/8",
        CodingRate::Off => "OFF",
    }
}

/// Parses a coding rate identifier. The `2/3` and `1/2` aliases used by some
/// network servers map onto 4/6 and 4/8.
pub fn parse_codr(s: &str) -> Result<CodingRate, FwdError> {
    match s {
        "4/5" => Ok(CodingRate::Cr4_5),
        "4/6" | "2/3" => Ok(CodingRate::Cr4_6),
        "4/7" => Ok(CodingRate::Cr4_7),
        "4/8" | "1/2" => Ok(CodingRate::Cr4_8),
        _ => Err(FwdError::Protocol(format!("bad codr {s:?}"))),
    }
}

/// ISO 8601 UTC with microsecond precision and trailing `Z`, the format used
/// for every `time` field on the wire.
pub fn iso8601_us(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Serde helper for base64-encoded payload fields (`rxpk.data`).
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
