use core::fmt;
use serde::{Deserialize, Serialize};

use crate::{Result, TransportError};

/// Bytes ahead of the command: start-of-message marker and length.
pub const HEADER_LEN: usize = 2;

/// Largest payload that still fits the one-byte length field (command + code + payload).
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 2;

/// Delivery class, carried on the wire as the start-of-message byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryClass {
    /// Acknowledged, retried by the transport.
    Ack,
    /// Best-effort, never retried.
    NoAck,
}

impl DeliveryClass {
    pub const fn som(self) -> u8 {
        match self {
            DeliveryClass::Ack => 0x02,
            DeliveryClass::NoAck => 0x04,
        }
    }

    pub fn from_som(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(DeliveryClass::Ack),
            0x04 => Some(DeliveryClass::NoAck),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryClass::Ack => f.write_str("ack"),
            DeliveryClass::NoAck => f.write_str("noack"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteResponse,
}

impl Command {
    pub const fn byte(self) -> u8 {
        match self {
            Command::ReadRequest => b'R',
            Command::ReadResponse => b'r',
            Command::WriteRequest => b'W',
            Command::WriteResponse => b'w',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'R' => Some(Command::ReadRequest),
            b'r' => Some(Command::ReadResponse),
            b'W' => Some(Command::WriteRequest),
            b'w' => Some(Command::WriteResponse),
            _ => None,
        }
    }
}

/// One protocol message: `[som][length][command][code][payload..]`.
///
/// `length` counts command, code and payload bytes and is derived from the
/// payload, so a message can never carry padding. Fields are only set through
/// [`Message::new`] and [`Message::from_bytes`], which both bound the payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Message {
    class: DeliveryClass,
    command: Command,
    code: u8,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(class: DeliveryClass, command: Command, code: u8, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            class,
            command,
            code,
            payload: payload.to_vec(),
        })
    }

    pub fn class(&self) -> DeliveryClass {
        self.class
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn length(&self) -> u8 {
        // payload <= MAX_PAYLOAD_LEN, so 2 + payload fits a u8
        (2 + self.payload.len()) as u8
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.length() as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.push(self.class.som());
        out.push(self.length());
        out.push(self.command.byte());
        out.push(self.code);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + 2 {
            return Err(TransportError::InvalidMessage("short message"));
        }
        let class = DeliveryClass::from_som(bytes[0])
            .ok_or(TransportError::InvalidMessage("start marker"))?;
        let len = bytes[1] as usize;
        if len < 2 {
            return Err(TransportError::InvalidMessage("length below header"));
        }
        if bytes.len() != HEADER_LEN + len {
            return Err(TransportError::InvalidMessage("length mismatch"));
        }
        let command =
            Command::from_byte(bytes[2]).ok_or(TransportError::InvalidMessage("command"))?;
        // a u8 length caps the payload at MAX_PAYLOAD_LEN already
        Ok(Self {
            class,
            command,
            code: bytes[3],
            payload: bytes[4..].to_vec(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} code=0x{:02X} [{}]",
            self.class,
            self.command.byte() as char,
            self.code,
            self.payload.len()
        )?;
        for b in &self.payload {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

/// Link statistics kept by the transport, one set per delivery class.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub rx: u32,
    pub rx_missing: u32,
    pub tx: u32,
    pub tx_retries: u32,
    pub tx_failed: u32,
    pub unwanted_acks: u32,
    pub unwanted_nacks: u32,
    pub unknown_commands: u32,
    pub unplausible_response: u32,
}

impl Counters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Field-wise sum, as reported for the counters-sum channel.
    pub fn sum(&self, other: &Counters) -> Counters {
        Counters {
            rx: self.rx.wrapping_add(other.rx),
            rx_missing: self.rx_missing.wrapping_add(other.rx_missing),
            tx: self.tx.wrapping_add(other.tx),
            tx_retries: self.tx_retries.wrapping_add(other.tx_retries),
            tx_failed: self.tx_failed.wrapping_add(other.tx_failed),
            unwanted_acks: self.unwanted_acks.wrapping_add(other.unwanted_acks),
            unwanted_nacks: self.unwanted_nacks.wrapping_add(other.unwanted_nacks),
            unknown_commands: self.unknown_commands.wrapping_add(other.unknown_commands),
            unplausible_response: self
                .unplausible_response
                .wrapping_add(other.unplausible_response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout() {
        let msg = Message::new(DeliveryClass::Ack, Command::WriteRequest, 0x09, &[1]).unwrap();
        assert_eq!(msg.length(), 3);
        assert_eq!(msg.to_bytes(), vec![0x02, 3, b'W', 0x09, 1]);
    }

    #[test]
    fn test_read_request_has_no_payload() {
        let msg = Message::new(DeliveryClass::NoAck, Command::ReadRequest, 0x02, &[]).unwrap();
        assert_eq!(msg.to_bytes(), vec![0x04, 2, b'R', 0x02]);
        assert_eq!(msg.wire_len(), 4);
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let bytes = [0x04, 4, b'r', 0x23, 0xAA, 0xBB];
        let msg = Message::from_bytes(&bytes).unwrap();
        assert_eq!(msg.class(), DeliveryClass::NoAck);
        assert_eq!(msg.command(), Command::ReadResponse);
        assert_eq!(msg.code(), 0x23);
        assert_eq!(msg.payload(), &[0xAA, 0xBB]);
        assert_eq!(msg.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(Message::from_bytes(&[0x02, 2, b'R']).is_err());
        assert!(Message::from_bytes(&[0x07, 2, b'R', 0]).is_err());
        assert!(Message::from_bytes(&[0x02, 3, b'R', 0]).is_err());
        assert!(Message::from_bytes(&[0x02, 2, b'X', 0]).is_err());
        assert!(Message::from_bytes(&[0x02, 1, b'R', 0]).is_err());
    }

    #[test]
    fn test_payload_limit() {
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(Message::new(DeliveryClass::Ack, Command::WriteRequest, 0, &big).is_none());
        let max = vec![0u8; MAX_PAYLOAD_LEN];
        let msg = Message::new(DeliveryClass::Ack, Command::WriteRequest, 0, &max).unwrap();
        assert_eq!(msg.length(), u8::MAX);
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), msg.wire_len());
        assert_eq!(usize::from(bytes[1]), bytes.len() - HEADER_LEN);
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_class_names_match_display() {
        for class in [DeliveryClass::Ack, DeliveryClass::NoAck] {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{class}\""));
            let back: DeliveryClass = serde_json::from_str(&json).unwrap();
            assert_eq!(back, class);
        }
    }

    #[test]
    fn test_counters_sum_and_reset() {
        let a = Counters {
            rx: 3,
            tx: 4,
            ..Default::default()
        };
        let b = Counters {
            rx: 1,
            tx_failed: 2,
            ..Default::default()
        };
        let mut s = a.sum(&b);
        assert_eq!(s.rx, 4);
        assert_eq!(s.tx, 4);
        assert_eq!(s.tx_failed, 2);
        s.reset();
        assert_eq!(s, Counters::default());
    }
}
