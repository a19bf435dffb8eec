//! Command script file format.

use serde::{Deserialize, Serialize};
use std::path::Path;

use rfstream_core::{Command, CommandError, Opcode, Ramp};

use crate::error::ConfigError;
use crate::validation::{ValidationResult, validate_script};

/// Operation names accepted in scripts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOp {
    /// Re-base time to zero.
    Reset,
    /// Re-base time and drop every channel.
    ResetAll,
    /// Arm an end trigger; `value` is the trigger id.
    TriggerEnd,
    /// Hold output for a start trigger; `value` is the trigger id.
    TriggerStart,
    /// Set amplitude.
    AmplitudeSet,
    /// Set frequency.
    FrequencySet,
    /// Ramp amplitude to `value` over `duration` steps.
    AmplitudeRamp,
    /// Ramp frequency to `value` over `duration` steps.
    FrequencyRamp,
    /// Overwrite phase.
    Phase,
    /// Append a channel.
    ChannelAdd,
    /// Remove a channel.
    ChannelRemove,
}

impl ScriptOp {
    /// Name as written in scripts.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::ResetAll => "reset_all",
            Self::TriggerEnd => "trigger_end",
            Self::TriggerStart => "trigger_start",
            Self::AmplitudeSet => "amplitude_set",
            Self::FrequencySet => "frequency_set",
            Self::AmplitudeRamp => "amplitude_ramp",
            Self::FrequencyRamp => "frequency_ramp",
            Self::Phase => "phase",
            Self::ChannelAdd => "channel_add",
            Self::ChannelRemove => "channel_remove",
        }
    }

    /// Amplitude or frequency ramp.
    pub const fn is_ramp(self) -> bool {
        matches!(self, Self::AmplitudeRamp | Self::FrequencyRamp)
    }

    /// Whether the `channel` key is meaningful for this op.
    pub const fn takes_channel(self) -> bool {
        !matches!(
            self,
            Self::Reset | Self::ResetAll | Self::TriggerEnd | Self::TriggerStart | Self::ChannelAdd
        )
    }
}

/// How a ramp reaches its final `value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RampShape {
    /// Straight line from `from` to the final value.
    Linear {
        /// Value at the first step of the ramp.
        from: i32,
    },
    /// Holds the final value for the whole window.
    Step,
    /// Explicit per-step values, `duration + 1` of them.
    Table {
        /// Value at each step offset.
        values: Vec<i32>,
    },
}

fn is_zero<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// One `[[command]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptCommand {
    /// Step at which the command becomes eligible.
    pub time: u32,

    /// Operation.
    pub op: ScriptOp,

    /// Target channel.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub channel: u32,

    /// Target value, or trigger id for trigger ops.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub value: i32,

    /// Ramp length in steps.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: u32,

    /// Ramp shape; required for ramps, rejected otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<RampShape>,
}

impl ScriptCommand {
    /// Create an entry with zero channel, value, and duration.
    pub fn new(time: u32, op: ScriptOp) -> Self {
        Self {
            time,
            op,
            channel: 0,
            value: 0,
            duration: 0,
            shape: None,
        }
    }

    /// Set the channel.
    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    /// Set the value.
    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }

    /// Set the ramp duration.
    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration;
        self
    }

    /// Set the ramp shape.
    pub fn with_shape(mut self, shape: RampShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Build the core command. A ramp without a shape behaves as `Step`.
    pub fn to_command(&self) -> Result<Command, CommandError> {
        let Self {
            time: t,
            channel: ch,
            value: v,
            duration: d,
            ..
        } = *self;
        Ok(match self.op {
            ScriptOp::Reset => Command::reset(t),
            ScriptOp::ResetAll => Command::reset_all(t),
            ScriptOp::TriggerEnd => Command::trigger_end(t, v as u32),
            ScriptOp::TriggerStart => Command::trigger_start(t, v as u32),
            ScriptOp::AmplitudeSet => Command::amplitude_set(t, ch, v),
            ScriptOp::FrequencySet => Command::frequency_set(t, ch, v),
            ScriptOp::Phase => Command::phase(t, ch, v),
            ScriptOp::ChannelAdd => Command::channel_add(t),
            ScriptOp::ChannelRemove => Command::channel_remove(t, ch),
            ScriptOp::AmplitudeRamp | ScriptOp::FrequencyRamp => {
                let amplitude = self.op == ScriptOp::AmplitudeRamp;
                let (opcode, ramp) = match &self.shape {
                    Some(RampShape::Linear { from }) => (
                        if amplitude {
                            Opcode::AmplitudeRamp
                        } else {
                            Opcode::FrequencyRamp
                        },
                        Ramp::linear(*from, v, d),
                    ),
                    Some(RampShape::Table { values }) => (
                        if amplitude {
                            Opcode::AmplitudeVectorRamp
                        } else {
                            Opcode::FrequencyVectorRamp
                        },
                        Ramp::table(values.clone()),
                    ),
                    Some(RampShape::Step) | None => (
                        if amplitude {
                            Opcode::AmplitudeRamp
                        } else {
                            Opcode::FrequencyRamp
                        },
                        Ramp::Constant(v),
                    ),
                };
                Command::ramp(opcode, t, ch, v, d, ramp)?
            }
        })
    }
}

/// A sparse command stream stored as TOML.
///
/// # TOML Format
///
/// ```toml
/// description = "two-tone sweep"
///
/// [[command]]
/// time = 0
/// op = "channel_add"
///
/// [[command]]
/// time = 0
/// op = "amplitude_ramp"
/// value = 1073741823
/// duration = 100
/// shape = { kind = "linear", from = 0 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandScript {
    /// Optional description of the script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Entries in stream order.
    #[serde(rename = "command", default)]
    pub commands: Vec<ScriptCommand>,
}

impl CommandScript {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn with(mut self, entry: ScriptCommand) -> Self {
        self.commands.push(entry);
        self
    }

    /// Append an entry in place.
    pub fn push(&mut self, entry: ScriptCommand) {
        self.commands.push(entry);
    }

    /// Load a script from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a script from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the script to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the script to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the script has no entries.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// First step after every entry's time and ramp window.
    pub fn end_time(&self) -> u32 {
        self.commands
            .iter()
            .map(|c| c.time.saturating_add(c.duration).saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Check the structure of every entry.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_script(self)
    }

    /// Validate and convert every entry into a core command.
    pub fn to_commands(&self) -> Result<Vec<Command>, ConfigError> {
        self.validate()?;
        self.commands
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_command().map_err(|e| ConfigError::command(i, e)))
            .collect()
    }
}
