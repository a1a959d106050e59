use anyhow::{Context, Result};
use clap::Parser;
use fw_tools::sign::sign_firmware;
use std::path::PathBuf;

/// Sign a firmware binary with Ed25519 and create a release package.
#[derive(Parser)]
#[command(name = "sign-firmware", version)]
struct Cli {
    /// Firmware binary to sign
    firmware: PathBuf,

    /// Ed25519 private key (PKCS#8 PEM)
    private_key: PathBuf,

    /// Output directory (default: directory named after the firmware,
    /// next to it)
    output_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let output_dir = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let stem = cli
                .firmware
                .file_stem()
                .context("firmware path has no file name")?;
            cli.firmware
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join(stem)
        }
    };

    let manifest = sign_firmware(&cli.firmware, &cli.private_key, &output_dir)?;

    println!("Signed firmware package created in {}/", output_dir.display());
    println!(
        "  Firmware:  {} ({} bytes)",
        manifest.firmware.file, manifest.firmware.size
    );
    println!("  SHA256:    {}", manifest.firmware.sha256);
    println!("  CRC32:     0x{:08x}", manifest.firmware.crc32);
    println!(
        "  Signature: {} ({} bytes)",
        manifest.signature.file, manifest.signature.size
    );
    println!();
    println!("Signature (hex):");
    println!("  {}", manifest.signature.hex);
    println!();
    println!("Signature verified successfully!");

    Ok(())
}
