//! Offline rendering of a command script to WAV.

use clap::Args;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::PathBuf;

use rfstream_core::{SAMPLES_PER_STEP, StepEngine, StepOutput};

use super::common::{feed, format_duration, load_script, load_settings};

/// Render a command script offline to a WAV file.
#[derive(Args)]
pub struct RenderArgs {
    /// Command script (TOML)
    pub script: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Steps to render (default: until the last command and ramp finish)
    #[arg(long)]
    pub steps: Option<u64>,

    /// Stream settings file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sample rate written to the WAV header (default: settings sample rate)
    #[arg(long)]
    pub header_rate: Option<u32>,
}

/// Run the render command.
pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    let (script, commands) = load_script(&args.script)?;
    let config = settings.to_stream_config()?;

    let steps = args.steps.unwrap_or_else(|| u64::from(script.end_time().max(1)));
    let header_rate = match args.header_rate {
        Some(rate) => rate,
        None => u32::try_from(settings.sample_rate).map_err(|_| {
            anyhow::anyhow!(
                "sample rate {} does not fit a WAV header; pass --header-rate",
                settings.sample_rate
            )
        })?,
    };

    let spec = WavSpec {
        channels: 1,
        sample_rate: header_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut wav = WavWriter::create(&args.output, spec)?;

    let (mut writer, mut engine) = StepEngine::offline(&config);
    let mut pending = commands.as_slice();
    let mut out = StepOutput::default();
    let mut samples = [0i16; SAMPLES_PER_STEP];
    let mut held = 0u64;

    for _ in 0..steps {
        if !pending.is_empty() {
            feed(&mut writer, &mut pending);
        }
        if !engine.step(&mut out) {
            held += 1;
        }
        out.write_i16(&mut samples);
        for &s in &samples {
            wav.write_sample(s)?;
        }
    }
    wav.finalize()?;

    let diagnostics = engine.diagnostics();
    let total = steps * SAMPLES_PER_STEP as u64;
    tracing::info!(steps, held, "render finished");
    println!("Rendered {} to {}", args.script.display(), args.output.display());
    println!("  Steps:      {steps} ({held} held by start triggers)");
    println!("  Output:     {}", format_duration(total, settings.sample_rate));
    println!("  Channels:   {}", engine.channels().len());
    println!("  Underflow:  {}", diagnostics.command_underflow());
    println!("  Malformed:  {}", diagnostics.malformed_commands());
    if !pending.is_empty() {
        println!("  Unsent:     {} commands", pending.len());
    }
    if let Some(fault) = diagnostics.fault() {
        anyhow::bail!("strict mode fault: {fault}");
    }
    Ok(())
}
