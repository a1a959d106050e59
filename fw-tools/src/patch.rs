//! Post-build patcher for the application header.
//!
//! The build emits firmware with `fw_size`, `fw_crc32` and
//! `header_crc32` pinned to 0xFFFFFFFF; this fills them in exactly the
//! way the bootloader recomputes them. Running it twice yields the same
//! bytes.

use common::app_header::{find_offset, AppHeader, APP_HEADER_SIZE, CRC_PLACEHOLDER};
use common::crc::crc32;
use log::{debug, info};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("application header magic not found in binary")]
    MagicNotFound,
    #[error("binary too small to hold the application header at offset {offset:#x}")]
    TooSmall { offset: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a patch run computed, for logging and the release manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub header_offset: usize,
    pub header: AppHeader,
}

/// Patch an in-memory image. The buffer is rewritten in place.
pub fn patch_image(data: &mut [u8]) -> Result<PatchReport, PatchError> {
    let offset = find_offset(data).ok_or(PatchError::MagicNotFound)?;
    if data.len() < offset + APP_HEADER_SIZE {
        return Err(PatchError::TooSmall { offset });
    }

    let header_bytes: [u8; APP_HEADER_SIZE] = data[offset..offset + APP_HEADER_SIZE]
        .try_into()
        .expect("slice length is APP_HEADER_SIZE");
    let mut header = AppHeader::parse(&header_bytes);
    debug!(
        "found app header at {:#x}: device_type={}, v{}, build {}",
        offset,
        header.device_type,
        header.fw_version,
        header.build_id_str()
    );

    header.fw_size = data.len() as u32;

    // Firmware CRC is computed over the whole image with both CRC
    // fields held at the placeholder, so it is stable across re-runs.
    let mut scratch = header.clone();
    scratch.fw_crc32 = CRC_PLACEHOLDER;
    scratch.header_crc32 = CRC_PLACEHOLDER;
    data[offset..offset + APP_HEADER_SIZE].copy_from_slice(&scratch.pack());
    header.fw_crc32 = crc32(data);

    // Header CRC covers the first 44 bytes, excluding itself.
    let packed = header.pack();
    header.header_crc32 = crc32(&packed[..APP_HEADER_SIZE - 4]);

    data[offset..offset + APP_HEADER_SIZE].copy_from_slice(&header.pack());

    Ok(PatchReport {
        header_offset: offset,
        header,
    })
}

/// Patch a binary on disk. `input` and `output` may be the same path.
pub fn patch_file(input: &Path, output: &Path) -> Result<PatchReport, PatchError> {
    let mut data = std::fs::read(input)?;
    let report = patch_image(&mut data)?;
    std::fs::write(output, &data)?;

    info!(
        "patched {} -> {}: size={}, fw_crc32={:#010x}, header_crc32={:#010x}",
        input.display(),
        output.display(),
        report.header.fw_size,
        report.header.fw_crc32,
        report.header.header_crc32
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::version::Version;

    /// 1024-byte image with a placeholder header at 0x200.
    fn sample_image() -> Vec<u8> {
        let mut image: Vec<u8> = (0u32..1024).map(|i| (i % 251) as u8).collect();
        let mut build_id = [0u8; 16];
        build_id[..5].copy_from_slice(b"test1");
        let header = AppHeader {
            magic: common::app_header::APP_HEADER_MAGIC,
            header_version: 1,
            device_type: 1,
            hw_revision_min: 1,
            hw_revision_max: 2,
            fw_version: Version::new(1, 2, 0),
            fw_flags: 0,
            fw_size: CRC_PLACEHOLDER,
            fw_crc32: CRC_PLACEHOLDER,
            fw_load_addr: 0x0800_4000,
            build_timestamp: 1_700_000_000,
            build_id,
            header_crc32: CRC_PLACEHOLDER,
        };
        image[0x200..0x200 + APP_HEADER_SIZE].copy_from_slice(&header.pack());
        image
    }

    #[test]
    fn test_patch_fills_size_and_crcs() {
        let mut image = sample_image();
        let pristine = image.clone();
        let report = patch_image(&mut image).unwrap();

        assert_eq!(report.header_offset, 0x200);
        assert_eq!(report.header.fw_size, 1024);

        // The firmware CRC is over the image with both CRC fields at the
        // placeholder, which is exactly the pristine input with fw_size
        // filled in.
        let mut expected = pristine;
        expected[0x200 + 12..0x200 + 16].copy_from_slice(&1024u32.to_le_bytes());
        assert_eq!(report.header.fw_crc32, crc32(&expected));

        // Header CRC covers the final header's first 44 bytes
        let patched_header = &image[0x200..0x200 + APP_HEADER_SIZE];
        assert_eq!(report.header.header_crc32, crc32(&patched_header[..44]));

        // Everything outside the header is untouched
        assert_eq!(&image[..0x200], &expected[..0x200]);
        assert_eq!(&image[0x200 + APP_HEADER_SIZE..], &expected[0x200 + APP_HEADER_SIZE..]);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut image = sample_image();
        let first = patch_image(&mut image).unwrap();
        let after_first = image.clone();

        let second = patch_image(&mut image).unwrap();
        assert_eq!(first, second);
        assert_eq!(image, after_first);
    }

    #[test]
    fn test_header_at_offset_zero() {
        let mut image = sample_image();
        // Move the header to the front
        let header: Vec<u8> = image[0x200..0x200 + APP_HEADER_SIZE].to_vec();
        image[..APP_HEADER_SIZE].copy_from_slice(&header);
        image[0x200..0x200 + APP_HEADER_SIZE].fill(0);

        let report = patch_image(&mut image).unwrap();
        assert_eq!(report.header_offset, 0);
    }

    #[test]
    fn test_missing_magic() {
        let mut image = vec![0u8; 512];
        assert!(matches!(
            patch_image(&mut image),
            Err(PatchError::MagicNotFound)
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut image = vec![0u8; 64];
        let at = 32;
        image[at..at + 4].copy_from_slice(&common::app_header::APP_HEADER_MAGIC.to_le_bytes());
        assert!(matches!(
            patch_image(&mut image),
            Err(PatchError::TooSmall { offset: 32 })
        ));
    }

    #[test]
    fn test_patch_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("firmware.bin");
        let output = dir.path().join("firmware-patched.bin");
        std::fs::write(&input, sample_image()).unwrap();

        let report = patch_file(&input, &output).unwrap();
        let written = std::fs::read(&output).unwrap();

        let mut expected = sample_image();
        patch_image(&mut expected).unwrap();
        assert_eq!(written, expected);
        assert_eq!(report.header.fw_size, 1024);
    }
}
