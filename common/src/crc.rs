//! Checksum primitives shared by the wire protocol, the OTA distributor
//! and the firmware build tooling.

use ::crc::{Crc, CRC_16_MCRF4XX, CRC_32_ISO_HDLC};

/// CRC-32 for firmware images and application headers.
///
/// Polynomial 0xEDB88320 (reflected), init 0xFFFFFFFF, final xor
/// 0xFFFFFFFF. Must match the table-driven implementation in the
/// bootloader.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16 for per-chunk integrity.
///
/// Polynomial 0x1021 (reflected), init 0xFFFF, no final xor.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_crc32_independent_of_chunking() {
        let data: Vec<u8> = (0u32..1000).map(|i| (i % 251) as u8).collect();
        let whole = crc32(&data);

        for split in [1, 7, 200, 999] {
            let mut digest = CRC32.digest();
            for part in data.chunks(split) {
                digest.update(part);
            }
            assert_eq!(digest.finalize(), whole);
        }
    }
}
