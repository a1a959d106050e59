//! Firmware release signing.
//!
//! Ed25519 over the entire binary (the scheme hashes internally). The
//! release directory carries the binary, a raw 64-byte signature, a
//! sha256 checksum file and a JSON manifest, and is re-verified from
//! the written artifacts before the tool reports success.

use chrono::{SecondsFormat, Utc};
use common::crc::crc32;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("failed to load private key: {0}")]
    Key(#[from] ed25519_dalek::pkcs8::Error),
    #[error("firmware path has no file name")]
    BadFirmwarePath,
    #[error("release verification failed: {0}")]
    VerifyFailed(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub signed_at: String,
    pub algorithm: String,
    pub firmware: FirmwareEntry,
    pub signature: SignatureEntry,
    pub public_key: PublicKeyEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareEntry {
    pub file: String,
    pub size: u64,
    pub sha256: String,
    pub crc32: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub file: String,
    pub size: u64,
    pub hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    pub hex: String,
}

/// Sign a firmware binary and lay out the release directory. The
/// emitted artifacts are verified before returning.
pub fn sign_firmware(
    firmware_path: &Path,
    key_path: &Path,
    output_dir: &Path,
) -> Result<Manifest, SignError> {
    let firmware = fs::read(firmware_path)?;
    let firmware_name = firmware_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(SignError::BadFirmwarePath)?
        .to_string();
    let stem = firmware_path
        .file_stem()
        .and_then(|n| n.to_str())
        .ok_or(SignError::BadFirmwarePath)?
        .to_string();

    let pem = fs::read_to_string(key_path)?;
    let signing_key = SigningKey::from_pkcs8_pem(&pem)?;
    let signature = signing_key.sign(&firmware);
    let public_key = signing_key.verifying_key();

    fs::create_dir_all(output_dir)?;
    fs::write(output_dir.join(&firmware_name), &firmware)?;

    let sig_name = format!("{}.sig", stem);
    fs::write(output_dir.join(&sig_name), signature.to_bytes())?;

    let sha256 = hex::encode(Sha256::digest(&firmware));
    fs::write(
        output_dir.join(format!("{}.sha256", stem)),
        format!("{}  {}\n", sha256, firmware_name),
    )?;

    let manifest = Manifest {
        version: "1.0".to_string(),
        signed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        algorithm: "Ed25519".to_string(),
        firmware: FirmwareEntry {
            file: firmware_name,
            size: firmware.len() as u64,
            sha256,
            crc32: crc32(&firmware),
        },
        signature: SignatureEntry {
            file: sig_name,
            size: signature.to_bytes().len() as u64,
            hex: hex::encode(signature.to_bytes()),
        },
        public_key: PublicKeyEntry {
            hex: hex::encode(public_key.to_bytes()),
        },
    };
    fs::write(
        output_dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    // Trust nothing until the bytes on disk verify
    verify_release(output_dir)?;

    info!(
        "signed release in {}: {} ({} bytes), sha256 {}",
        output_dir.display(),
        manifest.firmware.file,
        manifest.firmware.size,
        manifest.firmware.sha256
    );
    Ok(manifest)
}

/// Verify a signature against a raw public key.
pub fn verify_signature(firmware: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key
            .verify(firmware, &Signature::from_bytes(signature))
            .is_ok(),
        Err(_) => false,
    }
}

/// Re-verify a release directory from its manifest and artifacts.
pub fn verify_release(dir: &Path) -> Result<Manifest, SignError> {
    let manifest: Manifest = serde_json::from_str(&fs::read_to_string(dir.join("manifest.json"))?)?;

    let firmware = fs::read(dir.join(&manifest.firmware.file))?;
    if firmware.len() as u64 != manifest.firmware.size {
        return Err(SignError::VerifyFailed("firmware size mismatch"));
    }
    if hex::encode(Sha256::digest(&firmware)) != manifest.firmware.sha256 {
        return Err(SignError::VerifyFailed("sha256 mismatch"));
    }

    let signature = fs::read(dir.join(&manifest.signature.file))?;
    let signature: [u8; 64] = signature
        .try_into()
        .map_err(|_| SignError::VerifyFailed("signature is not 64 bytes"))?;

    let public_key = hex::decode(&manifest.public_key.hex)
        .map_err(|_| SignError::VerifyFailed("bad public key hex"))?;
    let public_key: [u8; 32] = public_key
        .try_into()
        .map_err(|_| SignError::VerifyFailed("public key is not 32 bytes"))?;

    if !verify_signature(&firmware, &signature, &public_key) {
        return Err(SignError::VerifyFailed("signature does not verify"));
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen;
    use rand::RngCore;

    fn release_fixture() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let keys = keygen::generate_keypair(dir.path()).unwrap();

        let mut firmware = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut firmware);
        let firmware_path = dir.path().join("firmware.bin");
        std::fs::write(&firmware_path, &firmware).unwrap();

        (dir, firmware_path, keys.private_key_path)
    }

    #[test]
    fn test_sign_and_verify_release() {
        let (dir, firmware_path, key_path) = release_fixture();
        let out = dir.path().join("release");

        let manifest = sign_firmware(&firmware_path, &key_path, &out).unwrap();
        assert_eq!(manifest.algorithm, "Ed25519");
        assert_eq!(manifest.firmware.size, 4096);
        assert_eq!(manifest.signature.size, 64);
        assert!(manifest.signed_at.ends_with('Z'));

        // All four artifacts land in the release directory
        assert!(out.join("firmware.bin").exists());
        assert!(out.join("firmware.sig").exists());
        assert!(out.join("firmware.sha256").exists());
        assert!(out.join("manifest.json").exists());

        let sha_line = std::fs::read_to_string(out.join("firmware.sha256")).unwrap();
        assert_eq!(
            sha_line,
            format!("{}  firmware.bin\n", manifest.firmware.sha256)
        );

        verify_release(&out).unwrap();
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let (dir, firmware_path, key_path) = release_fixture();
        let out = dir.path().join("release");
        sign_firmware(&firmware_path, &key_path, &out).unwrap();

        let released = out.join("firmware.bin");
        let mut data = std::fs::read(&released).unwrap();
        data[1000] ^= 0x01;
        std::fs::write(&released, &data).unwrap();

        assert!(matches!(
            verify_release(&out),
            Err(SignError::VerifyFailed(_))
        ));
    }

    #[test]
    fn test_signature_rejects_other_key() {
        let (dir, firmware_path, key_path) = release_fixture();
        let out = dir.path().join("release");
        let manifest = sign_firmware(&firmware_path, &key_path, &out).unwrap();

        let other_dir = tempfile::tempdir().unwrap();
        let other = keygen::generate_keypair(other_dir.path()).unwrap();

        let firmware = std::fs::read(&firmware_path).unwrap();
        let signature: [u8; 64] = hex::decode(&manifest.signature.hex)
            .unwrap()
            .try_into()
            .unwrap();
        assert!(!verify_signature(
            &firmware,
            &signature,
            &other.public_key_raw
        ));
    }
}
