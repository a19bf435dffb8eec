//! Error types for the streaming engine.
//!
//! Only [`CommandError`] and [`StreamError`] ever reach a caller as a `Result`.
//! [`ApplyError`] is produced by the generation thread's internal
//! command-apply step and is turned into diagnostic counters there, so it is
//! a plain `Copy` code that fits in an atomic.

use thiserror::Error;

use crate::command::Opcode;

/// Errors raised while constructing, encoding, or decoding commands.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The 4-bit opcode field holds a value with no assigned command.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    /// The channel index does not fit in the 28-bit channel field.
    #[error("channel {0} does not fit in the 28-bit channel field")]
    ChannelOutOfRange(u32),

    /// A wire duration that is negative, non-finite, or not a whole number of steps.
    #[error("invalid ramp duration {0}")]
    InvalidDuration(f32),

    /// A step count the `f32` wire duration cannot hold exactly.
    #[error("ramp duration {0} steps is not exactly representable on the wire")]
    DurationTooLong(u32),

    /// The ramp generator kind does not match the opcode.
    #[error("ramp generator does not match opcode {0}")]
    RampMismatch(Opcode),

    /// A vector ramp table whose length is not `duration + 1`.
    #[error("vector ramp table has {actual} values, expected {expected}")]
    VectorLength {
        /// `duration + 1`.
        expected: usize,
        /// Length of the supplied table.
        actual: usize,
    },

    /// A ramp record refers to a generator handle that is not registered.
    #[error("no ramp generator registered for handle {0}")]
    MissingGenerator(u32),

    /// A command log whose length is not a multiple of the record size.
    #[error("command log of {0} bytes is not a whole number of 20-byte records")]
    Truncated(usize),
}

/// Rejection reasons from the internal command-apply step.
///
/// These never abort a step: the caller counts them as malformed commands
/// and, in strict mode, latches the first one into
/// [`Diagnostics::fault`](crate::Diagnostics::fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum ApplyError {
    /// The command addresses a channel at or beyond the live channel count.
    #[error("channel index is not a live channel")]
    ChannelOutOfRange = 1,

    /// A ChannelAdd would exceed the fixed channel-table capacity.
    #[error("channel table is full")]
    ChannelTableFull = 2,
}

impl ApplyError {
    /// Numeric code stored in the shared fault cell (never 0).
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Inverse of [`code`](Self::code).
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::ChannelOutOfRange),
            2 => Some(Self::ChannelTableFull),
            _ => None,
        }
    }
}

/// Errors from the generation worker lifecycle.
#[derive(Debug, Error)]
pub enum StreamError {
    /// `start_worker` was called while the worker is already running.
    #[error("generation worker is already running")]
    AlreadyRunning,

    /// The OS refused to spawn the generation thread.
    #[error("failed to spawn generation thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The generation thread panicked; its engine state is lost.
    #[error("generation thread panicked")]
    WorkerPanicked,

    /// An earlier spawn failure or panic consumed the step engine.
    #[error("step engine is no longer available")]
    EngineLost,
}
