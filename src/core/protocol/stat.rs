// src/core/protocol/stat.rs

//! JSON schema of the periodic `stat` object attached to `PUSH_DATA`.

use serde::Serialize;

/// Status report composed by the stats task and consumed by the upstream
/// fanout. Coordinates are omitted when GPS is disabled or the position is
/// not (yet) valid; `ackr` is a percentage with one decimal.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    pub rxnb: u32,
    pub rxok: u32,
    pub rxfw: u32,
    pub ackr: f64,
    pub dwnb: u32,
    pub txnb: u32,
    pub pfrm: String,
    pub mail: String,
    pub desc: String,
}
