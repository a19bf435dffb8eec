//! Settings and script validation.
//!
//! Validation collects every problem it finds instead of stopping at the
//! first one, so a bad file can be fixed in a single pass.
//!
//! ```rust
//! use rfstream_config::{StreamSettings, ValidationError};
//!
//! let settings = StreamSettings { max_channels: 0, ..StreamSettings::default() };
//! assert!(matches!(settings.validate(), Err(ValidationError::OutOfRange { .. })));
//! ```

use thiserror::Error;

use rfstream_core::{ADD_CHANNEL, SAMPLES_PER_STEP};

use crate::script::CommandScript;
use crate::settings::StreamSettings;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A capacity or count that must be at least one.
    #[error("'{field}' must be non-zero")]
    Zero {
        /// Name of the setting.
        field: String,
    },

    /// Integer setting outside its allowed range.
    #[error("'{field}' value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Name of the setting.
        field: String,
        /// The value that was out of range.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },

    /// Sample count that must hold a whole number of steps.
    #[error("'{field}' value {value} is not a multiple of {step} samples")]
    NotStepMultiple {
        /// Name of the setting.
        field: String,
        /// The offending value.
        value: usize,
        /// Samples per step.
        step: usize,
    },

    /// Rate or duration that must be finite and positive.
    #[error("'{field}' must be positive, got {value}")]
    NotPositive {
        /// Name of the setting.
        field: String,
        /// The offending value.
        value: f64,
    },

    /// Ramp entry without a `shape`.
    #[error("command {index}: {op} requires a shape")]
    MissingShape {
        /// Position of the entry in the script.
        index: usize,
        /// Operation name.
        op: String,
    },

    /// Non-ramp entry with a `shape`.
    #[error("command {index}: {op} does not take a shape")]
    UnexpectedShape {
        /// Position of the entry in the script.
        index: usize,
        /// Operation name.
        op: String,
    },

    /// Channel index that does not fit the 28-bit channel field.
    #[error("command {index}: channel {channel} out of range")]
    ChannelOutOfRange {
        /// Position of the entry in the script.
        index: usize,
        /// The offending channel.
        channel: u32,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.len() > 1 {
        return Err(ValidationError::Multiple(errors));
    }
    errors.pop().map_or(Ok(()), Err)
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !(value.is_finite() && value > 0.0) {
        errors.push(ValidationError::NotPositive {
            field: field.to_string(),
            value,
        });
    }
}

/// Validate stream settings.
pub fn validate_settings(settings: &StreamSettings) -> ValidationResult<()> {
    let mut errors = Vec::new();

    let channels = settings.max_channels as u64;
    if !(1..=ADD_CHANNEL as u64).contains(&channels) {
        errors.push(ValidationError::OutOfRange {
            field: "max_channels".to_string(),
            value: channels,
            min: 1,
            max: ADD_CHANNEL as u64,
        });
    }
    for (field, value) in [
        ("command_capacity", settings.command_capacity),
        ("output_capacity", settings.output_capacity),
        ("steps_per_page", settings.steps_per_page),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero {
                field: field.to_string(),
            });
        }
    }
    if settings.output_capacity % SAMPLES_PER_STEP != 0 {
        errors.push(ValidationError::NotStepMultiple {
            field: "output_capacity".to_string(),
            value: settings.output_capacity,
            step: SAMPLES_PER_STEP,
        });
    }
    check_positive(&mut errors, "sample_rate", settings.sample_rate as f64);
    check_positive(&mut errors, "time_unit_hz", settings.time_unit_hz);
    if let Some(step_time) = settings.step_time {
        check_positive(&mut errors, "step_time", step_time);
    }

    collect(errors)
}

/// Validate the shape of every script entry.
///
/// Value-level checks (table lengths, ramp kinds) happen when the entries are
/// converted to commands.
pub fn validate_script(script: &CommandScript) -> ValidationResult<()> {
    let mut errors = Vec::new();
    for (index, entry) in script.commands.iter().enumerate() {
        let op = entry.op.name().to_string();
        match (entry.op.is_ramp(), entry.shape.is_some()) {
            (true, false) => errors.push(ValidationError::MissingShape { index, op }),
            (false, true) => errors.push(ValidationError::UnexpectedShape { index, op }),
            _ => {}
        }
        if entry.op.takes_channel() && entry.channel >= ADD_CHANNEL {
            errors.push(ValidationError::ChannelOutOfRange {
                index,
                channel: entry.channel,
            });
        }
    }
    collect(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{RampShape, ScriptCommand, ScriptOp};

    #[test]
    fn default_settings_are_valid() {
        assert!(validate_settings(&StreamSettings::default()).is_ok());
    }

    #[test]
    fn collects_every_settings_error() {
        let settings = StreamSettings {
            max_channels: 0,
            output_capacity: 0,
            time_unit_hz: -1.0,
            ..StreamSettings::default()
        };
        match validate_settings(&settings) {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn partial_step_output_capacity_rejected() {
        let settings = StreamSettings {
            output_capacity: 1000,
            ..StreamSettings::default()
        };
        assert_eq!(
            validate_settings(&settings),
            Err(ValidationError::NotStepMultiple {
                field: "output_capacity".to_string(),
                value: 1000,
                step: 32,
            })
        );
        let settings = StreamSettings {
            output_capacity: 1024,
            ..StreamSettings::default()
        };
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn nan_step_time_rejected() {
        let settings = StreamSettings {
            step_time: Some(f64::NAN),
            ..StreamSettings::default()
        };
        assert!(matches!(
            validate_settings(&settings),
            Err(ValidationError::NotPositive { .. })
        ));
    }

    #[test]
    fn ramp_without_shape_rejected() {
        let script = CommandScript::new()
            .with(ScriptCommand::new(0, ScriptOp::AmplitudeRamp).with_duration(4))
            .with(ScriptCommand::new(0, ScriptOp::AmplitudeSet).with_shape(RampShape::Step));
        match validate_script(&script) {
            Err(ValidationError::Multiple(errors)) => {
                assert!(matches!(errors[0], ValidationError::MissingShape { index: 0, .. }));
                assert!(matches!(errors[1], ValidationError::UnexpectedShape { index: 1, .. }));
            }
            other => panic!("expected two errors, got {other:?}"),
        }
    }

    #[test]
    fn channel_field_overflow_rejected() {
        let script = CommandScript::new()
            .with(ScriptCommand::new(0, ScriptOp::Phase).with_channel(ADD_CHANNEL));
        assert_eq!(
            validate_script(&script),
            Err(ValidationError::ChannelOutOfRange {
                index: 0,
                channel: ADD_CHANNEL
            })
        );
    }

    #[test]
    fn multiple_display_joins_messages() {
        let err = ValidationError::Multiple(vec![
            ValidationError::Zero {
                field: "a".to_string(),
            },
            ValidationError::Zero {
                field: "b".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "multiple validation errors: 'a' must be non-zero; 'b' must be non-zero"
        );
    }
}
