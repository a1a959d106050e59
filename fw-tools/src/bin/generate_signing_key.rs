use anyhow::Result;
use clap::Parser;
use fw_tools::keygen::{generate_keypair, PRIVATE_KEY_FILE};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Generate an Ed25519 keypair for firmware signing.
///
/// The private key stays with the build system; the public key is
/// embedded in the bootloader via the emitted C header.
#[derive(Parser)]
#[command(name = "generate-signing-key", version)]
struct Cli {
    /// Output directory
    #[arg(default_value = "keys")]
    output_dir: PathBuf,

    /// Overwrite an existing private key without asking
    #[arg(long)]
    force: bool,
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
    let private_key_path = cli.output_dir.join(PRIVATE_KEY_FILE);
    if private_key_path.exists() && !cli.force {
        println!("Warning: {} already exists!", private_key_path.display());
        print!("Overwrite? (yes/no): ");
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if answer.trim().to_lowercase() != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    let keys = generate_keypair(&cli.output_dir)?;

    println!("Generated Ed25519 keypair in {}/", cli.output_dir.display());
    println!("  Private key: {} (KEEP SECRET!)", PRIVATE_KEY_FILE);
    println!("  Public key:  {}", fw_tools::keygen::PUBLIC_KEY_FILE);
    println!("  C header:    {}", fw_tools::keygen::C_HEADER_FILE);
    println!();
    println!("Public key (hex):");
    println!("  {}", hex::encode(keys.public_key_raw));
    println!();
    println!("IMPORTANT: Add {} to .gitignore!", PRIVATE_KEY_FILE);

    Ok(())
}
