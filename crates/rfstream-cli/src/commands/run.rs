//! Live streaming through the two-thread engine.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rfstream_core::{Opcode, SAMPLES_PER_STEP, Stream};

use super::common::{feed, format_duration, load_script, load_settings};

/// Stream a command script and drain its samples with a simulated device.
#[derive(Args)]
pub struct RunArgs {
    /// Command script (TOML)
    pub script: PathBuf,

    /// Stream settings file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output pages to drain (default: enough to cover the script)
    #[arg(long)]
    pub pages: Option<u64>,

    /// Publish every start trigger in the script at this global time
    #[arg(long)]
    pub start_time: Option<u64>,
}

/// Run the live stream command.
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    let (script, commands) = load_script(&args.script)?;
    let config = settings.to_stream_config()?;

    let page_samples = (config.steps_per_page * SAMPLES_PER_STEP) as u64;
    let pages = args.pages.unwrap_or_else(|| {
        u64::from(script.end_time())
            .div_ceil(config.steps_per_page as u64)
            .max(1)
    });
    let target = pages * page_samples;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut stream = Stream::new(config);
    let mut pending = commands.as_slice();
    // Time-0 setup goes in before the worker starts.
    feed(stream.split().0, &mut pending);

    if let Some(time) = args.start_time {
        for id in commands
            .iter()
            .filter(|c| c.opcode() == Opcode::MetaTriggerStart)
            .map(|c| c.trigger_id())
        {
            stream.publish_start_trigger(id, time);
            tracing::debug!(id, time, "published start trigger");
        }
    }

    println!("Streaming {} for {pages} pages", args.script.display());
    println!("Press Ctrl+C to stop...");
    stream.start_worker()?;

    let mut drained = 0u64;
    let mut peak = 0i16;
    while drained < target && running.load(Ordering::SeqCst) {
        if !pending.is_empty() {
            feed(stream.split().0, &mut pending);
        }
        let ready = stream.borrow_ready_samples();
        if ready.is_empty() {
            std::thread::yield_now();
            continue;
        }
        let n = ready.len().min((target - drained) as usize);
        peak = ready[..n]
            .iter()
            .fold(peak, |p, s| p.max(s.saturating_abs()));
        stream.release_samples(n);
        drained += n as u64;
    }
    stream.stop_worker()?;

    let interrupted = !running.load(Ordering::SeqCst);
    tracing::info!(drained, interrupted, "stream stopped");

    println!("{}", if interrupted { "Interrupted" } else { "Done" });
    println!(
        "  Drained:          {}",
        format_duration(drained, settings.sample_rate)
    );
    println!("  Peak:             {peak}");
    println!("  Command underflow: {}", stream.command_underflow());
    println!("  Sample underflow:  {}", stream.sample_underflow());
    println!("  Malformed:         {}", stream.malformed_commands());
    println!("  Slow mode:         {}", stream.is_in_slow_mode());
    if stream.triggered_end_id() != 0 {
        println!("  End trigger:       {}", stream.triggered_end_id());
    }
    if !pending.is_empty() {
        println!("  Unsent:            {} commands", pending.len());
    }
    if let Some(fault) = stream.fault() {
        anyhow::bail!("strict mode fault: {fault}");
    }
    Ok(())
}
