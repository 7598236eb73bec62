// src/core/beacon.rs

//! Timed beacon frame construction.
//!
//! The 17-byte payload carries the network ID and beacon time protected by
//! an 8-bit CRC, followed by the gateway coordinates protected by a 16-bit
//! CRC. Everything but the time fields is fixed at startup.

use crc::{Algorithm, Crc};

use crate::hal::{
    Bandwidth, CodingRate, DataRate, SpreadingFactor, TxMode, TxPacket,
};

/// Fixed beacon payload length.
pub const BEACON_SIZE: usize = 17;

/// 3-byte network identifier placed in the beacon header.
const BEACON_NETID: u32 = 0xC0_FF_EE;

/// CRC-8 with the CCITT 0x87 polynomial used for the beacon header.
const CRC8_BEACON: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x87,
    init: 0xFF,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x6A,
    residue: 0x00,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC8_BEACON);
const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// Builds beacon frames with the static fields precomputed. One builder per
/// downstream worker; `packet` stamps the time fields for each emission.
#[derive(Debug, Clone)]
pub struct BeaconBuilder {
    payload: [u8; BEACON_SIZE],
}

impl BeaconBuilder {
    /// Precomputes the static payload fields from the publicly reported
    /// gateway coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let mut payload = [0u8; BEACON_SIZE];

        // header: 3-byte NetID, little endian; bytes 3..7 take the time
        payload[0] = BEACON_NETID as u8;
        payload[1] = (BEACON_NETID >> 8) as u8;
        payload[2] = (BEACON_NETID >> 16) as u8;

        // info descriptor, always zero for now
        payload[8] = 0;

        // signed 24-bit coordinates; +90 N saturates to 89.99999 N, while
        // +180 and -180 are the same meridian (0x800000)
        let scale = f64::from(1u32 << 23);
        let lat = ((latitude / 90.0) * scale) as i32;
        let lat = lat.clamp(-(1 << 23), (1 << 23) - 1);
        let lon = (((longitude / 180.0) * scale) as i32) & 0x00FF_FFFF;
        payload[9] = lat as u8;
        payload[10] = (lat >> 8) as u8;
        payload[11] = (lat >> 16) as u8;
        payload[12] = lon as u8;
        payload[13] = (lon >> 8) as u8;
        payload[14] = (lon >> 16) as u8;

        let crc2 = CRC16.checksum(&payload[8..15]);
        payload[15] = crc2 as u8;
        payload[16] = (crc2 >> 8) as u8;

        Self { payload }
    }

    /// Stamps the beacon time, seals the header CRC and returns the frame
    /// ready for GPS-triggered transmission on `freq_hz`.
    pub fn packet(&mut self, utc_secs: u32, freq_hz: u32) -> TxPacket {
        self.payload[3] = utc_secs as u8;
        self.payload[4] = (utc_secs >> 8) as u8;
        self.payload[5] = (utc_secs >> 16) as u8;
        self.payload[6] = (utc_secs >> 24) as u8;
        self.payload[7] = CRC8.checksum(&self.payload[0..7]);

        TxPacket {
            mode: TxMode::OnGps,
            freq_hz,
            rf_chain: 0,
            rf_power: 14,
            datarate: DataRate::Lora(SpreadingFactor::Sf9),
            bandwidth: Bandwidth::Khz125,
            coderate: CodingRate::Cr4_5,
            invert_pol: true,
            f_dev_khz: 0,
            preamble: 6,
            no_crc: true,
            no_header: true,
            payload: self.payload.to_vec(),
        }
    }

    /// The current payload bytes, for inspection.
    pub fn payload(&self) -> &[u8; BEACON_SIZE] {
        &self.payload
    }
}
