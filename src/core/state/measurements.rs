// src/core/state/measurements.rs

//! Statistics counter bundles. Each bundle sits behind its own lock; the
//! stats task snapshots and zeroes a whole bundle atomically once per
//! reporting interval.

/// Upstream (uplink) traffic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpstreamMeasurements {
    /// Packets fetched from the concentrator or the ghost source.
    pub nb_rx_rcv: u32,
    /// Packets with payload CRC OK.
    pub nb_rx_ok: u32,
    /// Packets with payload CRC error.
    pub nb_rx_bad: u32,
    /// Packets without payload CRC.
    pub nb_rx_nocrc: u32,
    /// Packets that survived filtering and were serialized.
    pub pkt_fwd: u32,
    /// UDP bytes sent upstream.
    pub network_byte: u32,
    /// Radio payload bytes sent upstream.
    pub payload_byte: u32,
    /// PUSH_DATA datagrams sent (one per started server per cycle).
    pub dgram_sent: u32,
    /// PUSH_ACK datagrams matched.
    pub ack_rcv: u32,
}

impl UpstreamMeasurements {
    /// Returns the current values and resets every counter.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// Downstream (downlink) traffic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownstreamMeasurements {
    /// PULL_DATA keep-alives sent.
    pub pull_sent: u32,
    /// PULL_ACK datagrams matched (duplicates counted once).
    pub ack_rcv: u32,
    /// PULL_RESP datagrams accepted (JSON parsed without error).
    pub dgram_rcv: u32,
    /// UDP bytes received downstream.
    pub network_byte: u32,
    /// Radio payload bytes handed to the concentrator.
    pub payload_byte: u32,
    /// Frames the concentrator accepted for TX.
    pub nb_tx_ok: u32,
    /// Frames the concentrator rejected.
    pub nb_tx_fail: u32,
}

impl DownstreamMeasurements {
    /// Returns the current values and resets every counter.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
