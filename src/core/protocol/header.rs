// src/core/protocol/header.rs

//! The 12-byte datagram header shared by every protocol message.

use std::fmt;

use crate::core::errors::FwdError;

/// Protocol version byte carried by every datagram.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of a full header: version, token, command, gateway EUI.
pub const HEADER_SIZE: usize = 12;

/// Size of the prefix present on every datagram, acknowledgements included.
pub const ACK_PREFIX_SIZE: usize = 4;

/// Command byte of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PushData),
            0x01 => Some(Self::PushAck),
            0x02 => Some(Self::PullData),
            0x03 => Some(Self::PullResp),
            0x04 => Some(Self::PullAck),
            _ => None,
        }
    }
}

/// 64-bit gateway unique identifier, sent big-endian in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eui64(pub u64);

impl Eui64 {
    /// Parses the 16-hex-digit `gateway_ID` configuration string.
    pub fn parse(s: &str) -> Result<Self, FwdError> {
        u64::from_str_radix(s, 16)
            .map(Eui64)
            .map_err(|_| FwdError::Config(format!("invalid gateway_ID {s:?}")))
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Decoded datagram prefix. The gateway EUI is only present on gateway
/// originated datagrams; server replies are prefix-only.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub token: u16,
    pub command: Command,
}

impl Header {
    /// Encodes a full gateway-to-server header.
    pub fn encode(token: u16, command: Command, eui: Eui64) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = PROTOCOL_VERSION;
        buf[1..3].copy_from_slice(&token.to_be_bytes());
        buf[3] = command as u8;
        buf[4..12].copy_from_slice(&eui.0.to_be_bytes());
        buf
    }

    /// Decodes the prefix of a server datagram. Returns `None` for anything
    /// undersized, with the wrong protocol version, or with an unknown
    /// command byte; such datagrams are ignored by the workers.
    pub fn parse(buf: &[u8]) -> Option<Header> {
        if buf.len() < ACK_PREFIX_SIZE || buf[0] != PROTOCOL_VERSION {
            return None;
        }
        let command = Command::from_byte(buf[3])?;
        let token = u16::from_be_bytes([buf[1], buf[2]]);
        Some(Header { token, command })
    }

    /// True when this datagram is the acknowledgement `expected` for the
    /// token of the last request sent.
    pub fn is_ack(&self, expected: Command, token: u16) -> bool {
        self.command == expected && self.token == token
    }
}
