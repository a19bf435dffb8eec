//! Command script to binary command log.

use clap::Args;
use std::path::PathBuf;

use rfstream_config::{RampSidecar, sidecar_path};
use rfstream_core::{RECORD_SIZE, encode_log};

use super::common::load_script;

/// Encode a command script into 20-byte records.
#[derive(Args)]
pub struct EncodeArgs {
    /// Command script (TOML)
    pub script: PathBuf,

    /// Output log file; ramps go to `<stem>.ramps.toml` beside it
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Run the encode command.
pub fn run(args: EncodeArgs) -> anyhow::Result<()> {
    let (_, commands) = load_script(&args.script)?;
    let (records, sidecar) = RampSidecar::encode(&commands)?;

    std::fs::write(&args.output, encode_log(&records))?;
    println!(
        "Wrote {} records ({} bytes) to {}",
        records.len(),
        records.len() * RECORD_SIZE,
        args.output.display()
    );

    if !sidecar.is_empty() {
        let path = sidecar_path(&args.output);
        sidecar.save(&path)?;
        println!("Wrote {} ramp generators to {}", sidecar.len(), path.display());
    }
    Ok(())
}
