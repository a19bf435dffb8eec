//! Print the records of a binary command log.

use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use rfstream_config::{RampSidecar, sidecar_path};
use rfstream_core::{CommandRecord, GeneratorRegistry, decode_log};

/// Print a command log, one record per line.
#[derive(Args)]
pub struct DumpArgs {
    /// Command log file
    pub log: PathBuf,

    /// Emit JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Ramp sidecar (default: `<stem>.ramps.toml` if present)
    #[arg(long)]
    pub ramps: Option<PathBuf>,
}

#[derive(Serialize)]
struct RecordLine {
    index: usize,
    time: u32,
    opcode: &'static str,
    channel: u32,
    final_value: i32,
    duration: f32,
    generator: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the dump command.
pub fn run(args: DumpArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.log)?;
    let records = decode_log(&bytes)?;

    let ramps = args.ramps.unwrap_or_else(|| sidecar_path(&args.log));
    let registry = if ramps.exists() {
        RampSidecar::load(&ramps)?.to_registry()
    } else {
        tracing::debug!(path = %ramps.display(), "no ramp sidecar");
        GeneratorRegistry::new()
    };

    for (index, record) in records.iter().enumerate() {
        if args.json {
            println!("{}", serde_json::to_string(&json_line(index, record, &registry))?);
        } else {
            match registry.decode(record) {
                Ok(cmd) => println!("{index:>6}  {cmd}"),
                Err(e) => println!("{index:>6}  {}  <{e}>", raw(record)),
            }
        }
    }
    if !args.json {
        println!("{} records", records.len());
    }
    Ok(())
}

fn json_line(index: usize, record: &CommandRecord, registry: &GeneratorRegistry) -> RecordLine {
    RecordLine {
        index,
        time: record.time,
        opcode: record.opcode().map_or("unknown", |op| op.name()),
        channel: record.channel(),
        final_value: record.final_value,
        duration: record.duration,
        generator: record.generator,
        error: registry.decode(record).err().map(|e| e.to_string()),
    }
}

fn raw(record: &CommandRecord) -> String {
    format!(
        "op={} t={} chn={} val={} len={} gen={}",
        record.opcode_bits(),
        record.time,
        record.channel(),
        record.final_value,
        record.duration,
        record.generator
    )
}
