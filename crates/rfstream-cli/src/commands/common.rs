//! Shared CLI helpers used across multiple commands.

use std::path::Path;

use rfstream_config::{CommandScript, StreamSettings};
use rfstream_core::{Command, CommandWriter};

/// Load settings from `path`, or the defaults when no file is given.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<StreamSettings> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading settings");
            Ok(StreamSettings::load(path)?)
        }
        None => Ok(StreamSettings::default()),
    }
}

/// Load and convert a command script.
pub fn load_script(path: &Path) -> anyhow::Result<(CommandScript, Vec<Command>)> {
    let script = CommandScript::load(path)?;
    let commands = script
        .to_commands()
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    tracing::info!(
        commands = commands.len(),
        end_time = script.end_time(),
        "loaded script"
    );
    Ok((script, commands))
}

/// Push as much of `pending` as the command ring takes, publish it, and
/// advance `pending` past what was written.
pub fn feed<'a>(writer: &mut CommandWriter, pending: &mut &'a [Command]) -> usize {
    let rest: &'a [Command] = *pending;
    let n = writer.write_commands(rest);
    writer.flush();
    *pending = &rest[n..];
    n
}

/// Human-readable sample count at `rate` samples per second.
pub fn format_duration(samples: u64, rate: u64) -> String {
    if rate == 0 {
        return format!("{samples} samples");
    }
    let secs = samples as f64 / rate as f64;
    if secs < 1e-3 {
        format!("{samples} samples ({:.3} us)", secs * 1e6)
    } else if secs < 1.0 {
        format!("{samples} samples ({:.3} ms)", secs * 1e3)
    } else {
        format!("{samples} samples ({secs:.3} s)")
    }
}
