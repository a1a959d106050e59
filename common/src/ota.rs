//! OTA payload layouts.
//!
//! All fields little-endian, packed, no padding. The wire sentinels
//! (`0xFFFF` for "no chunk received") are translated to `Option` at this
//! boundary; the rest of the crate never sees them.

use crate::crc::crc16;
use crate::packet::{le_u16, le_u32, DecodeError};
use crate::version::Version;

/// Maximum firmware data bytes carried by one chunk.
pub const CHUNK_DATA_MAX: usize = 200;

/// Target device type matching every device class.
pub const TARGET_ALL_DEVICES: u8 = 0xFF;

/// Wire sentinel in `OTA_REQUEST` for "no chunk received yet".
pub const NO_CHUNK_RECEIVED: u16 = 0xFFFF;

/// Broadcast announcement of an available firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaAnnounce {
    pub target_device_type: u8,
    pub version: Version,
    pub firmware_size: u32,
    pub total_chunks: u16,
    pub firmware_crc32: u32,
    pub announce_id: u32,
}

impl OtaAnnounce {
    pub const SIZE: usize = 18;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.target_device_type;
        buf[1] = self.version.major;
        buf[2] = self.version.minor;
        buf[3] = self.version.patch;
        buf[4..8].copy_from_slice(&self.firmware_size.to_le_bytes());
        buf[8..10].copy_from_slice(&self.total_chunks.to_le_bytes());
        buf[10..14].copy_from_slice(&self.firmware_crc32.to_le_bytes());
        buf[14..18].copy_from_slice(&self.announce_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(OtaAnnounce {
            target_device_type: buf[0],
            version: Version::new(buf[1], buf[2], buf[3]),
            firmware_size: le_u32(buf, 4),
            total_chunks: le_u16(buf, 8),
            firmware_crc32: le_u32(buf, 10),
            announce_id: le_u32(buf, 14),
        })
    }
}

/// Pull request from a device that wants the announced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaRequest {
    pub announce_id: u32,
    pub current_version: Version,
    /// `None` when the device has no chunks yet (wire `0xFFFF`).
    pub last_chunk_received: Option<u16>,
}

impl OtaRequest {
    pub const SIZE: usize = 9;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.announce_id.to_le_bytes());
        buf[4] = self.current_version.major;
        buf[5] = self.current_version.minor;
        buf[6] = self.current_version.patch;
        let last = self.last_chunk_received.unwrap_or(NO_CHUNK_RECEIVED);
        buf[7..9].copy_from_slice(&last.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        let last = le_u16(buf, 7);
        Ok(OtaRequest {
            announce_id: le_u32(buf, 0),
            current_version: Version::new(buf[4], buf[5], buf[6]),
            last_chunk_received: if last == NO_CHUNK_RECEIVED {
                None
            } else {
                Some(last)
            },
        })
    }
}

/// One slice of the firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaChunk {
    pub announce_id: u32,
    pub chunk_index: u16,
    pub data: Vec<u8>,
}

impl OtaChunk {
    pub const HEADER_SIZE: usize = 10;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.announce_id.to_le_bytes());
        buf.extend_from_slice(&self.chunk_index.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&crc16(&self.data).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode and validate a chunk payload. The buffer must hold exactly
    /// `chunk_size` data bytes and the embedded CRC-16 must match.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        let chunk_size = le_u16(buf, 6) as usize;
        if buf.len() != Self::HEADER_SIZE + chunk_size {
            return Err(DecodeError::PayloadTruncated);
        }

        let data = buf[Self::HEADER_SIZE..].to_vec();
        let expected = le_u16(buf, 8);
        let actual = crc16(&data);
        if expected != actual {
            return Err(DecodeError::ChunkCrcMismatch {
                expected,
                actual,
            });
        }

        Ok(OtaChunk {
            announce_id: le_u32(buf, 0),
            chunk_index: le_u16(buf, 4),
            data,
        })
    }
}

/// Chunk acknowledgement. NACKs share the layout; `status` carries the
/// device's error class there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaChunkAck {
    pub announce_id: u32,
    pub chunk_index: u16,
    pub status: u8,
}

impl OtaChunkAck {
    pub const SIZE: usize = 7;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.announce_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.chunk_index.to_le_bytes());
        buf[6] = self.status;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(OtaChunkAck {
            announce_id: le_u32(buf, 0),
            chunk_index: le_u16(buf, 4),
            status: buf[6],
        })
    }
}

/// Final verdict from a device after it has the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaComplete {
    pub announce_id: u32,
    pub calculated_crc32: u32,
    /// 0 when the device-side CRC matched the announced image.
    pub status: u8,
}

impl OtaComplete {
    pub const SIZE: usize = 9;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.announce_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.calculated_crc32.to_le_bytes());
        buf[8] = self.status;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(OtaComplete {
            announce_id: le_u32(buf, 0),
            calculated_crc32: le_u32(buf, 4),
            status: buf[8],
        })
    }
}

/// Session abort broadcast by the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaAbort {
    pub announce_id: u32,
}

impl OtaAbort {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.announce_id.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(OtaAbort {
            announce_id: le_u32(buf, 0),
        })
    }
}

/// Unsolicited progress report from a device. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaStatus {
    pub announce_id: u32,
    pub chunks_received: u16,
    pub total_chunks: u16,
    pub state: u8,
    pub error_code: u8,
}

impl OtaStatus {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.announce_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.chunks_received.to_le_bytes());
        buf[6..8].copy_from_slice(&self.total_chunks.to_le_bytes());
        buf[8] = self.state;
        buf[9] = self.error_code;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::SIZE {
            return Err(DecodeError::PayloadTruncated);
        }
        Ok(OtaStatus {
            announce_id: le_u32(buf, 0),
            chunks_received: le_u16(buf, 4),
            total_chunks: le_u16(buf, 6),
            state: buf[8],
            error_code: buf[9],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_announce_layout() {
        let announce = OtaAnnounce {
            target_device_type: TARGET_ALL_DEVICES,
            version: Version::new(1, 2, 0),
            firmware_size: 450,
            total_chunks: 3,
            firmware_crc32: 0xAABB_CCDD,
            announce_id: 0xDEAD_BEEF,
        };
        let buf = announce.encode();

        assert_eq!(buf.len(), OtaAnnounce::SIZE);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(&buf[1..4], &[1, 2, 0]);
        assert_eq!(&buf[4..8], &450u32.to_le_bytes());
        assert_eq!(&buf[8..10], &3u16.to_le_bytes());
        assert_eq!(&buf[10..14], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&buf[14..18], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(OtaAnnounce::decode(&buf), Ok(announce));
    }

    #[test]
    fn test_request_sentinel_translation() {
        let fresh = OtaRequest {
            announce_id: 1,
            current_version: Version::new(1, 1, 0),
            last_chunk_received: None,
        };
        let buf = fresh.encode();
        assert_eq!(&buf[7..9], &[0xFF, 0xFF]);
        assert_eq!(OtaRequest::decode(&buf), Ok(fresh));

        let resumed = OtaRequest {
            last_chunk_received: Some(41),
            ..fresh
        };
        assert_eq!(OtaRequest::decode(&resumed.encode()), Ok(resumed));
    }

    #[test]
    fn test_request_truncated() {
        assert_eq!(
            OtaRequest::decode(&[0u8; OtaRequest::SIZE - 1]),
            Err(DecodeError::PayloadTruncated)
        );
    }

    #[test]
    fn test_chunk_roundtrip() {
        let chunk = OtaChunk {
            announce_id: 0xDEAD_BEEF,
            chunk_index: 7,
            data: (0u8..200).collect(),
        };
        let buf = chunk.encode();
        assert_eq!(buf.len(), OtaChunk::HEADER_SIZE + 200);
        assert_eq!(OtaChunk::decode(&buf), Ok(chunk));
    }

    #[test]
    fn test_chunk_crc_mismatch_rejected() {
        let chunk = OtaChunk {
            announce_id: 1,
            chunk_index: 0,
            data: vec![1, 2, 3, 4],
        };
        let mut buf = chunk.encode();
        buf[OtaChunk::HEADER_SIZE] ^= 0x01; // corrupt one data byte

        assert!(matches!(
            OtaChunk::decode(&buf),
            Err(DecodeError::ChunkCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_chunk_length_must_match_exactly() {
        let chunk = OtaChunk {
            announce_id: 1,
            chunk_index: 0,
            data: vec![1, 2, 3, 4],
        };
        let mut buf = chunk.encode();

        buf.push(0x00);
        assert_eq!(OtaChunk::decode(&buf), Err(DecodeError::PayloadTruncated));

        buf.truncate(OtaChunk::HEADER_SIZE + 2);
        assert_eq!(OtaChunk::decode(&buf), Err(DecodeError::PayloadTruncated));
    }

    #[test]
    fn test_chunk_ack_roundtrip() {
        let ack = OtaChunkAck {
            announce_id: 0x0102_0304,
            chunk_index: 9,
            status: 0,
        };
        assert_eq!(ack.encode().len(), OtaChunkAck::SIZE);
        assert_eq!(OtaChunkAck::decode(&ack.encode()), Ok(ack));
    }

    #[test]
    fn test_complete_roundtrip() {
        let complete = OtaComplete {
            announce_id: 5,
            calculated_crc32: 0x1234_5678,
            status: 1,
        };
        assert_eq!(OtaComplete::decode(&complete.encode()), Ok(complete));
    }

    #[test]
    fn test_abort_roundtrip() {
        let abort = OtaAbort {
            announce_id: 0xFEED_F00D,
        };
        assert_eq!(OtaAbort::decode(&abort.encode()), Ok(abort));
    }

    #[test]
    fn test_status_roundtrip() {
        let status = OtaStatus {
            announce_id: 77,
            chunks_received: 12,
            total_chunks: 40,
            state: 3,
            error_code: 0,
        };
        assert_eq!(OtaStatus::decode(&status.encode()), Ok(status));
    }

    proptest! {
        /// Slicing a firmware buffer into chunks and decoding them back
        /// reconstructs the original image.
        #[test]
        fn prop_chunk_reassembly(data in proptest::collection::vec(any::<u8>(), 1..2048)) {
            let total_chunks = (data.len() + CHUNK_DATA_MAX - 1) / CHUNK_DATA_MAX;

            let mut rebuilt = Vec::with_capacity(data.len());
            for index in 0..total_chunks {
                let start = index * CHUNK_DATA_MAX;
                let end = usize::min(start + CHUNK_DATA_MAX, data.len());
                let chunk = OtaChunk {
                    announce_id: 42,
                    chunk_index: index as u16,
                    data: data[start..end].to_vec(),
                };
                let decoded = OtaChunk::decode(&chunk.encode()).unwrap();
                prop_assert!(decoded.data.len() <= CHUNK_DATA_MAX);
                rebuilt.extend_from_slice(&decoded.data);
            }

            prop_assert_eq!(rebuilt, data);
        }
    }
}
