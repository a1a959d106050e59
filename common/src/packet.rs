//! Wire codec for the leader <-> endpoint LoRa protocol.
//!
//! Every packet is a fixed 24-byte little-endian header followed by a
//! message-specific payload. The layouts here are a contract with the
//! endpoint bootloader and firmware and must stay bit-exact.

use crate::crc::crc16;
use crate::ota::OtaAnnounce;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Magic bytes opening every frame.
pub const MAGIC: [u8; 2] = *b"AG";
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 24;

/// Device class the leader reports in outbound headers.
pub const DEVICE_TYPE_LEADER: u8 = 0x00;

/// Raw message tags at or above this value belong to the OTA block.
pub const OTA_MSG_BASE: u8 = 0x10;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    SensorReport = 0x01,
    Ack = 0x02,
    Config = 0x03,
    LogData = 0x04,
    LogAck = 0x05,
    TimeSync = 0x06,

    OtaAnnounce = 0x10,
    OtaRequest = 0x11,
    OtaChunk = 0x12,
    OtaChunkAck = 0x13,
    OtaChunkNack = 0x14,
    OtaComplete = 0x15,
    OtaAbort = 0x16,
    OtaStatus = 0x17,
}

impl MessageType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::SensorReport),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Config),
            0x04 => Some(Self::LogData),
            0x05 => Some(Self::LogAck),
            0x06 => Some(Self::TimeSync),
            0x10 => Some(Self::OtaAnnounce),
            0x11 => Some(Self::OtaRequest),
            0x12 => Some(Self::OtaChunk),
            0x13 => Some(Self::OtaChunkAck),
            0x14 => Some(Self::OtaChunkNack),
            0x15 => Some(Self::OtaComplete),
            0x16 => Some(Self::OtaAbort),
            0x17 => Some(Self::OtaStatus),
            _ => None,
        }
    }

    pub fn is_ota(self) -> bool {
        self as u8 >= OTA_MSG_BASE
    }
}

/// Known endpoint device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceClass {
    SoilMoisture = 0x01,
    ValveControl = 0x02,
    WaterMeter = 0x03,
}

impl DeviceClass {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::SoilMoisture),
            0x02 => Some(Self::ValveControl),
            0x03 => Some(Self::WaterMeter),
            _ => None,
        }
    }

    /// Label for logs and API output, falling back to the raw value for
    /// classes this build does not know about.
    pub fn label(raw: u8) -> String {
        match Self::from_raw(raw) {
            Some(Self::SoilMoisture) => "SOIL_MOISTURE".to_string(),
            Some(Self::ValveControl) => "VALVE_CONTROL".to_string(),
            Some(Self::WaterMeter) => "WATER_METER".to_string(),
            None => raw.to_string(),
        }
    }
}

/// Sensor report flag bits. Bits 4-7 are reserved and must be preserved.
pub mod report_flags {
    pub const LOW_BATTERY: u8 = 0x01;
    pub const FIRST_BOOT: u8 = 0x02;
    pub const CONFIG_REQUEST: u8 = 0x04;
    pub const HAS_PENDING: u8 = 0x08;
}

/// ACK response flag bits.
pub mod ack_flags {
    pub const SEND_LOGS: u8 = 0x01;
    pub const CONFIG_AVAILABLE: u8 = 0x02;
    pub const TIME_SYNC: u8 = 0x04;
}

/// 16-byte opaque device identifier. Equality is byte equality; rendered
/// as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceUuid(pub [u8; 16]);

impl DeviceUuid {
    /// The leader's own identifier (all zeros).
    pub const LEADER: DeviceUuid = DeviceUuid([0; 16]);

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceUuid({})", self)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid device UUID {0:?} (expected 32 hex characters)")]
pub struct ParseUuidError(pub String);

impl FromStr for DeviceUuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(&cleaned).map_err(|_| ParseUuidError(s.to_string()))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ParseUuidError(s.to_string()))?;
        Ok(DeviceUuid(bytes))
    }
}

impl Serialize for DeviceUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Errors raised while decoding inbound frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame shorter than the packet header")]
    ShortFrame,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    UnknownVersion(u8),
    #[error("payload truncated")]
    PayloadTruncated,
    #[error("chunk CRC mismatch (expected {expected:#06x}, got {actual:#06x})")]
    ChunkCrcMismatch { expected: u16, actual: u16 },
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Fixed 24-byte packet header.
///
/// The magic and protocol version are validated on decode and implied on
/// encode, so they do not appear as fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub msg_type: u8,
    pub device_type: u8,
    pub uuid: DeviceUuid,
    pub sequence: u16,
    pub payload_len: u8,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2] = PROTOCOL_VERSION;
        buf[3] = self.msg_type;
        buf[4] = self.device_type;
        buf[5..21].copy_from_slice(&self.uuid.0);
        buf[21..23].copy_from_slice(&self.sequence.to_le_bytes());
        buf[23] = self.payload_len;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<PacketHeader, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortFrame);
        }
        if buf[0..2] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        if buf[2] != PROTOCOL_VERSION {
            return Err(DecodeError::UnknownVersion(buf[2]));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[5..21]);

        Ok(PacketHeader {
            msg_type: buf[3],
            device_type: buf[4],
            uuid: DeviceUuid(uuid),
            sequence: le_u16(buf, 21),
            payload_len: buf[23],
        })
    }
}

/// Split a raw frame into its header and payload slice.
pub fn parse_frame(frame: &[u8]) -> Result<(PacketHeader, &[u8]), DecodeError> {
    let header = PacketHeader::decode(frame)?;
    let end = HEADER_LEN + header.payload_len as usize;
    if frame.len() < end {
        return Err(DecodeError::PayloadTruncated);
    }
    Ok((header, &frame[HEADER_LEN..end]))
}

/// Sensor report payload sent by field endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReport {
    pub timestamp: u32,
    pub moisture_raw: u16,
    pub moisture_percent: u8,
    pub battery_mv: u16,
    pub temperature_deci_c: u16,
    pub rssi: u16,
    pub pending_logs: u8,
    pub flags: u8,
}

impl SensorReport {
    pub const SIZE: usize = 15;

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(SensorReport {
            timestamp: le_u32(buf, 0),
            moisture_raw: le_u16(buf, 4),
            moisture_percent: buf[6],
            battery_mv: le_u16(buf, 7),
            temperature_deci_c: le_u16(buf, 9),
            rssi: le_u16(buf, 11),
            pending_logs: buf[13],
            flags: buf[14],
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..6].copy_from_slice(&self.moisture_raw.to_le_bytes());
        buf[6] = self.moisture_percent;
        buf[7..9].copy_from_slice(&self.battery_mv.to_le_bytes());
        buf[9..11].copy_from_slice(&self.temperature_deci_c.to_le_bytes());
        buf[11..13].copy_from_slice(&self.rssi.to_le_bytes());
        buf[13] = self.pending_logs;
        buf[14] = self.flags;
        buf
    }
}

/// ACK payload the leader returns for sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    pub acked_sequence: u16,
    pub status: u8,
    pub flags: u8,
}

impl AckPayload {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.acked_sequence.to_le_bytes());
        buf[2] = self.status;
        buf[3] = self.flags;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(AckPayload {
            acked_sequence: le_u16(buf, 0),
            status: buf[2],
            flags: buf[3],
        })
    }
}

/// Assembles outbound frames with the leader's UUID and a sender-local
/// monotone sequence counter (mod 2^16).
pub struct PacketBuilder {
    uuid: DeviceUuid,
    sequence: u16,
}

impl PacketBuilder {
    pub fn new(uuid: DeviceUuid) -> Self {
        Self {
            uuid,
            sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Wrap a payload in a packet header. Payloads longer than 255 bytes
    /// cannot be represented on the wire.
    pub fn build(&mut self, msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= u8::MAX as usize);

        let header = PacketHeader {
            msg_type: msg_type as u8,
            device_type: DEVICE_TYPE_LEADER,
            uuid: self.uuid,
            sequence: self.next_sequence(),
            payload_len: payload.len() as u8,
        };

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn build_ack(&mut self, acked_sequence: u16, status: u8, flags: u8) -> Vec<u8> {
        let payload = AckPayload {
            acked_sequence,
            status,
            flags,
        }
        .encode();
        self.build(MessageType::Ack, &payload)
    }

    pub fn build_ota_announce(&mut self, announce: &OtaAnnounce) -> Vec<u8> {
        self.build(MessageType::OtaAnnounce, &announce.encode())
    }

    pub fn build_ota_chunk(&mut self, announce_id: u32, chunk_index: u16, data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(crate::ota::OtaChunk::HEADER_SIZE + data.len());
        payload.extend_from_slice(&announce_id.to_le_bytes());
        payload.extend_from_slice(&chunk_index.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        payload.extend_from_slice(&crc16(data).to_le_bytes());
        payload.extend_from_slice(data);
        self.build(MessageType::OtaChunk, &payload)
    }

    pub fn build_ota_abort(&mut self, announce_id: u32) -> Vec<u8> {
        self.build(MessageType::OtaAbort, &announce_id.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ota::OtaChunk;
    use proptest::prelude::*;

    fn sample_header() -> PacketHeader {
        PacketHeader {
            msg_type: MessageType::SensorReport as u8,
            device_type: DeviceClass::SoilMoisture as u8,
            uuid: DeviceUuid([0xAB; 16]),
            sequence: 0x1234,
            payload_len: 15,
        }
    }

    #[test]
    fn test_header_encode_layout() {
        let encoded = sample_header().encode();

        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(&encoded[0..2], b"AG");
        assert_eq!(encoded[2], PROTOCOL_VERSION);
        assert_eq!(encoded[3], 0x01);
        assert_eq!(encoded[4], 0x01);
        assert_eq!(&encoded[5..21], &[0xAB; 16]);
        assert_eq!(&encoded[21..23], &[0x34, 0x12]);
        assert_eq!(encoded[23], 15);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        assert_eq!(PacketHeader::decode(&header.encode()), Ok(header));
    }

    #[test]
    fn test_decode_short_frame() {
        assert_eq!(
            PacketHeader::decode(&[0u8; HEADER_LEN - 1]),
            Err(DecodeError::ShortFrame)
        );
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut buf = sample_header().encode();
        buf[0] = b'X';
        assert_eq!(PacketHeader::decode(&buf), Err(DecodeError::BadMagic));
    }

    #[test]
    fn test_decode_unknown_version() {
        let mut buf = sample_header().encode();
        buf[2] = 9;
        assert_eq!(
            PacketHeader::decode(&buf),
            Err(DecodeError::UnknownVersion(9))
        );
    }

    #[test]
    fn test_parse_frame_truncated_payload() {
        let mut frame = sample_header().encode().to_vec();
        frame.extend_from_slice(&[0u8; 10]); // header promises 15
        assert_eq!(parse_frame(&frame), Err(DecodeError::PayloadTruncated));
    }

    #[test]
    fn test_parse_frame_ignores_trailing_bytes() {
        let mut header = sample_header();
        header.payload_len = 2;
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&[0xDE, 0xAD, 0x00, 0x00]);

        let (decoded, payload) = parse_frame(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, &[0xDE, 0xAD]);
    }

    #[test]
    fn test_sensor_report_roundtrip() {
        let report = SensorReport {
            timestamp: 1_700_000_000,
            moisture_raw: 2048,
            moisture_percent: 57,
            battery_mv: 3300,
            temperature_deci_c: 215,
            rssi: 90,
            pending_logs: 3,
            flags: report_flags::HAS_PENDING | 0xF0, // reserved bits survive
        };
        assert_eq!(SensorReport::decode(&report.encode()), Ok(report));
    }

    #[test]
    fn test_sensor_report_truncated() {
        assert_eq!(
            SensorReport::decode(&[0u8; SensorReport::SIZE - 1]),
            Err(DecodeError::PayloadTruncated)
        );
    }

    #[test]
    fn test_ack_payload_layout() {
        let ack = AckPayload {
            acked_sequence: 0x0102,
            status: 0,
            flags: ack_flags::SEND_LOGS,
        };
        assert_eq!(ack.encode(), [0x02, 0x01, 0x00, 0x01]);
        assert_eq!(AckPayload::decode(&ack.encode()), Ok(ack));
    }

    #[test]
    fn test_builder_sequence_increments_and_wraps() {
        let mut builder = PacketBuilder::new(DeviceUuid::LEADER);

        let first = builder.build_ack(7, 0, 0);
        let second = builder.build_ack(8, 0, 0);
        assert_eq!(PacketHeader::decode(&first).unwrap().sequence, 1);
        assert_eq!(PacketHeader::decode(&second).unwrap().sequence, 2);

        builder.sequence = u16::MAX;
        let wrapped = builder.build_ack(9, 0, 0);
        assert_eq!(PacketHeader::decode(&wrapped).unwrap().sequence, 0);
    }

    #[test]
    fn test_builder_ota_chunk_frame() {
        let mut builder = PacketBuilder::new(DeviceUuid::LEADER);
        let data = [0x11u8, 0x22, 0x33];

        let frame = builder.build_ota_chunk(0xDEAD_BEEF, 5, &data);
        let (header, payload) = parse_frame(&frame).unwrap();

        assert_eq!(header.msg_type, MessageType::OtaChunk as u8);
        assert_eq!(header.device_type, DEVICE_TYPE_LEADER);
        let chunk = OtaChunk::decode(payload).unwrap();
        assert_eq!(chunk.announce_id, 0xDEAD_BEEF);
        assert_eq!(chunk.chunk_index, 5);
        assert_eq!(chunk.data, data);
    }

    #[test]
    fn test_uuid_display_and_parse() {
        let uuid = DeviceUuid([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]);
        let rendered = uuid.to_string();
        assert_eq!(rendered, "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(rendered.parse::<DeviceUuid>(), Ok(uuid));
        // dashed form is accepted too
        assert_eq!(
            "01020304-0506-0708-090a-0b0c0d0e0f10".parse::<DeviceUuid>(),
            Ok(uuid)
        );
        assert!("not-a-uuid".parse::<DeviceUuid>().is_err());
    }

    #[test]
    fn test_message_type_ota_split() {
        assert!(!MessageType::SensorReport.is_ota());
        assert!(MessageType::OtaAnnounce.is_ota());
        assert!(MessageType::OtaStatus.is_ota());
        assert_eq!(MessageType::from_raw(0x42), None);
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(
            msg_type in any::<u8>(),
            device_type in any::<u8>(),
            uuid in any::<[u8; 16]>(),
            sequence in any::<u16>(),
            payload_len in any::<u8>(),
        ) {
            let header = PacketHeader {
                msg_type,
                device_type,
                uuid: DeviceUuid(uuid),
                sequence,
                payload_len,
            };
            prop_assert_eq!(PacketHeader::decode(&header.encode()), Ok(header));
        }
    }
}
