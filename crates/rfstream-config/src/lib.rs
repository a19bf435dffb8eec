//! Configuration and command scripts for rfstream.
//!
//! This crate holds everything the engine reads from disk: stream settings,
//! human-written command scripts, and the ramp sidecar that accompanies a
//! binary command log.
//!
//! # Features
//!
//! - **Settings**: `StreamSettings` with per-key defaults, converted to the
//!   core `StreamConfig`
//! - **Scripts**: `[[command]]` TOML files converted to core `Command`s
//! - **Sidecars**: ramp values keyed by wire handle, next to a 20-byte log
//! - **Validation**: every problem in a file reported at once
//!
//! # Example
//!
//! ```rust,no_run
//! use rfstream_config::{CommandScript, StreamSettings};
//! use rfstream_core::{StepEngine, StepOutput};
//!
//! let settings = StreamSettings::load("stream.toml").unwrap();
//! let script = CommandScript::load("sweep.toml").unwrap();
//!
//! let (mut writer, mut engine) = StepEngine::offline(&settings.to_stream_config().unwrap());
//! writer.write_commands(&script.to_commands().unwrap());
//! writer.flush();
//!
//! let mut out = StepOutput::default();
//! engine.step(&mut out);
//! ```

mod error;
mod script;
mod settings;

/// Ramp sidecar files for binary command logs.
pub mod sidecar;

/// Settings and script validation.
pub mod validation;

pub use error::ConfigError;
pub use script::{CommandScript, RampShape, ScriptCommand, ScriptOp};
pub use settings::{BackoffSettings, StreamSettings};
pub use sidecar::{RampSidecar, SidecarKind, SidecarRamp, sidecar_path};
pub use validation::{ValidationError, ValidationResult, validate_script, validate_settings};
