use anyhow::Result;
use clap::Parser;
use fw_tools::patch::patch_file;
use std::path::PathBuf;

/// Patch the application header of a compiled firmware binary with its
/// final size and CRCs.
#[derive(Parser)]
#[command(name = "patch-app-header", version)]
struct Cli {
    /// Input binary file
    input: PathBuf,

    /// Output binary file (default: modify in place)
    output: Option<PathBuf>,

    /// Suppress output
    #[arg(short, long)]
    quiet: bool,
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
    let output = cli.output.as_ref().unwrap_or(&cli.input);
    let report = patch_file(&cli.input, output)?;

    if !cli.quiet {
        let header = &report.header;
        println!("Found app header at offset 0x{:X}", report.header_offset);
        println!("  Device type: {}", header.device_type);
        println!("  Version: {}", header.fw_version);
        println!("  Build ID: {}", header.build_id_str());
        println!("  Firmware size: {} bytes", header.fw_size);
        println!("  Firmware CRC: 0x{:08X}", header.fw_crc32);
        println!("  Header CRC: 0x{:08X}", header.header_crc32);
        println!("Patched binary written to {}", output.display());
    }

    Ok(())
}
