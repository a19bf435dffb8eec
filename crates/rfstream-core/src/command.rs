//! Control commands consumed by the step engine.
//!
//! A [`Command`] is one timestamped control event: a meta operation (reset,
//! trigger), a channel-table edit, or an amplitude/frequency/phase edit on one
//! channel. Commands are immutable once built; the constructors are the only
//! way to make one, so opcode, channel, and ramp generator always agree.
//!
//! ## Integer units
//!
//! | Field | Unit |
//! |-------|------|
//! | amplitude | full scale at `i32::MAX` (see [`kernel`](crate::kernel)) |
//! | frequency | 10 × Hz |
//! | phase | `MAX_PHASE` per cycle |
//! | time, duration | steps of [`SAMPLES_PER_STEP`](crate::kernel::SAMPLES_PER_STEP) samples |
//!
//! ## Ramps
//!
//! Ramp opcodes carry a [`Ramp`] generator mapping a step offset (0 at the
//! command's `time`) to a value. Scalar ramps are evaluated lazily, one step
//! ahead; vector ramps carry a table of exactly `duration + 1` values checked
//! at construction.

use core::fmt;
use std::sync::Arc;

use crate::error::CommandError;

/// Number of bits holding the opcode in the packed opcode/channel word.
pub const OPCODE_BITS: u32 = 4;

/// Number of bits holding the channel index in the packed opcode/channel word.
pub const CHANNEL_BITS: u32 = 32 - OPCODE_BITS;

/// Reserved channel value meaning "append a new channel".
pub const ADD_CHANNEL: u32 = (1 << CHANNEL_BITS) - 1;

/// Command operation. The discriminant is the 4-bit wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Opcode {
    /// Re-base time to zero.
    #[default]
    MetaReset = 0,
    /// Re-base time, drop every channel, and clear the underflow counters.
    MetaResetAll = 1,
    /// Arm an end trigger; `final_value` is the trigger id.
    MetaTriggerEnd = 2,
    /// Hold output until a start trigger; `final_value` is the trigger id.
    MetaTriggerStart = 3,
    /// Set a channel's amplitude.
    AmplitudeSet = 4,
    /// Ramp a channel's amplitude with a scalar generator.
    AmplitudeRamp = 5,
    /// Ramp a channel's amplitude through a precomputed table.
    AmplitudeVectorRamp = 6,
    /// Set a channel's frequency.
    FrequencySet = 7,
    /// Ramp a channel's frequency with a scalar generator.
    FrequencyRamp = 8,
    /// Ramp a channel's frequency through a precomputed table.
    FrequencyVectorRamp = 9,
    /// Overwrite a channel's phase.
    Phase = 10,
    /// Append a channel with zeroed state.
    ChannelAdd = 11,
    /// Remove a channel, moving the last channel into its slot.
    ChannelRemove = 12,
}

impl Opcode {
    /// Decodes a 4-bit wire value.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::MetaReset,
            1 => Self::MetaResetAll,
            2 => Self::MetaTriggerEnd,
            3 => Self::MetaTriggerStart,
            4 => Self::AmplitudeSet,
            5 => Self::AmplitudeRamp,
            6 => Self::AmplitudeVectorRamp,
            7 => Self::FrequencySet,
            8 => Self::FrequencyRamp,
            9 => Self::FrequencyVectorRamp,
            10 => Self::Phase,
            11 => Self::ChannelAdd,
            12 => Self::ChannelRemove,
            _ => return None,
        })
    }

    /// The 4-bit wire value.
    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Reset, ResetAll, TriggerEnd, TriggerStart.
    #[inline]
    pub const fn is_meta(self) -> bool {
        matches!(
            self,
            Self::MetaReset | Self::MetaResetAll | Self::MetaTriggerEnd | Self::MetaTriggerStart
        )
    }

    /// ChannelAdd or ChannelRemove.
    #[inline]
    pub const fn is_channel_edit(self) -> bool {
        matches!(self, Self::ChannelAdd | Self::ChannelRemove)
    }

    /// Commands that edit one live channel's amplitude, frequency, or phase.
    #[inline]
    pub const fn edits_channel_state(self) -> bool {
        !self.is_meta() && !self.is_channel_edit()
    }

    /// Any of the four ramp opcodes.
    #[inline]
    pub const fn is_ramp(self) -> bool {
        matches!(
            self,
            Self::AmplitudeRamp
                | Self::AmplitudeVectorRamp
                | Self::FrequencyRamp
                | Self::FrequencyVectorRamp
        )
    }

    /// The two vector-ramp opcodes.
    #[inline]
    pub const fn is_vector_ramp(self) -> bool {
        matches!(self, Self::AmplitudeVectorRamp | Self::FrequencyVectorRamp)
    }

    /// Short lowercase name used in command dumps.
    pub const fn name(self) -> &'static str {
        match self {
            Self::MetaReset => "reset",
            Self::MetaResetAll => "reset_all",
            Self::MetaTriggerEnd => "trigger_end",
            Self::MetaTriggerStart => "trigger_start",
            Self::AmplitudeSet => "amp_set",
            Self::AmplitudeRamp => "amp_ramp",
            Self::AmplitudeVectorRamp => "amp_vec_ramp",
            Self::FrequencySet => "freq_set",
            Self::FrequencyRamp => "freq_ramp",
            Self::FrequencyVectorRamp => "freq_vec_ramp",
            Self::Phase => "phase",
            Self::ChannelAdd => "add_chn",
            Self::ChannelRemove => "del_chn",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The rampable channel fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Carrier amplitude.
    Amplitude,
    /// Carrier frequency.
    Frequency,
}

/// Step-offset to value function carried by scalar ramps.
pub type ScalarFn = dyn Fn(u32) -> i32 + Send + Sync;

/// Ramp value generator.
///
/// Cloning is cheap: callables and tables are reference counted, and
/// equality between ramps is identity (same callable, same table).
#[derive(Clone)]
pub enum Ramp {
    /// The same value at every step.
    Constant(i32),
    /// A callable evaluated lazily at each step offset.
    Scalar(Arc<ScalarFn>),
    /// A precomputed table indexed by step offset.
    Vector(Arc<[i32]>),
}

impl Ramp {
    /// Wraps a callable as a scalar ramp.
    pub fn scalar(f: impl Fn(u32) -> i32 + Send + Sync + 'static) -> Self {
        Self::Scalar(Arc::new(f))
    }

    /// Linear scalar ramp from `from` at offset 0 to `to` at offset `duration`.
    ///
    /// Intermediate values are truncated toward `from`, so the sequence is
    /// monotonic and hits both end points exactly.
    pub fn linear(from: i32, to: i32, duration: u32) -> Self {
        let span = to as i64 - from as i64;
        Self::scalar(move |step| {
            if duration == 0 || step >= duration {
                return to;
            }
            (from as i64 + span * step as i64 / duration as i64) as i32
        })
    }

    /// Precomputed table ramp.
    pub fn table(values: impl Into<Arc<[i32]>>) -> Self {
        Self::Vector(values.into())
    }

    /// Evaluates the generator at `step` without caching.
    ///
    /// Table lookups past the end clamp to the last value.
    pub fn value_at(&self, step: u32) -> i32 {
        match self {
            Self::Constant(v) => *v,
            Self::Scalar(f) => f(step),
            Self::Vector(t) => t
                .get(step as usize)
                .or_else(|| t.last())
                .copied()
                .unwrap_or(0),
        }
    }

    /// Identity comparison.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Constant(a), Self::Constant(b)) => a == b,
            (Self::Scalar(a), Self::Scalar(b)) => Arc::ptr_eq(a, b),
            (Self::Vector(a), Self::Vector(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }
}

impl fmt::Debug for Ramp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Scalar(_) => f.write_str("Scalar(..)"),
            Self::Vector(t) => write!(f, "Vector(len={})", t.len()),
        }
    }
}

/// One timestamped control event.
#[derive(Debug, Clone, Default)]
pub struct Command {
    time: u32,
    opcode: Opcode,
    channel: u32,
    final_value: i32,
    duration: u32,
    ramp: Option<Ramp>,
}

impl Command {
    const fn simple(time: u32, opcode: Opcode, channel: u32, final_value: i32) -> Self {
        Self {
            time,
            opcode,
            channel,
            final_value,
            duration: 0,
            ramp: None,
        }
    }

    /// Re-bases time to zero when applied.
    pub const fn reset(time: u32) -> Self {
        Self::simple(time, Opcode::MetaReset, 0, 0)
    }

    /// Re-bases time and drops every channel.
    pub const fn reset_all(time: u32) -> Self {
        Self::simple(time, Opcode::MetaResetAll, 0, 0)
    }

    /// Arms end trigger `id`.
    pub const fn trigger_end(time: u32, id: u32) -> Self {
        Self::simple(time, Opcode::MetaTriggerEnd, 0, id as i32)
    }

    /// Holds output until start trigger `id` has been published and reached.
    pub const fn trigger_start(time: u32, id: u32) -> Self {
        Self::simple(time, Opcode::MetaTriggerStart, 0, id as i32)
    }

    /// Sets `channel`'s amplitude.
    pub const fn amplitude_set(time: u32, channel: u32, amplitude: i32) -> Self {
        Self::simple(time, Opcode::AmplitudeSet, channel, amplitude)
    }

    /// Sets `channel`'s frequency (10 × Hz).
    pub const fn frequency_set(time: u32, channel: u32, frequency: i32) -> Self {
        Self::simple(time, Opcode::FrequencySet, channel, frequency)
    }

    /// Overwrites `channel`'s phase.
    pub const fn phase(time: u32, channel: u32, phase: i32) -> Self {
        Self::simple(time, Opcode::Phase, channel, phase)
    }

    /// Appends a channel.
    pub const fn channel_add(time: u32) -> Self {
        Self::simple(time, Opcode::ChannelAdd, ADD_CHANNEL, 0)
    }

    /// Removes `channel`; the last channel moves into its slot.
    pub const fn channel_remove(time: u32, channel: u32) -> Self {
        Self::simple(time, Opcode::ChannelRemove, channel, 0)
    }

    /// Amplitude ramp driven by a constant or scalar generator.
    pub fn amplitude_ramp(
        time: u32,
        channel: u32,
        final_value: i32,
        duration: u32,
        ramp: Ramp,
    ) -> Result<Self, CommandError> {
        Self::ramp(Opcode::AmplitudeRamp, time, channel, final_value, duration, ramp)
    }

    /// Frequency ramp driven by a constant or scalar generator.
    pub fn frequency_ramp(
        time: u32,
        channel: u32,
        final_value: i32,
        duration: u32,
        ramp: Ramp,
    ) -> Result<Self, CommandError> {
        Self::ramp(Opcode::FrequencyRamp, time, channel, final_value, duration, ramp)
    }

    /// Amplitude ramp through a table of `duration + 1` values.
    pub fn amplitude_vector_ramp(
        time: u32,
        channel: u32,
        final_value: i32,
        duration: u32,
        values: impl Into<Arc<[i32]>>,
    ) -> Result<Self, CommandError> {
        Self::ramp(
            Opcode::AmplitudeVectorRamp,
            time,
            channel,
            final_value,
            duration,
            Ramp::table(values),
        )
    }

    /// Frequency ramp through a table of `duration + 1` values.
    pub fn frequency_vector_ramp(
        time: u32,
        channel: u32,
        final_value: i32,
        duration: u32,
        values: impl Into<Arc<[i32]>>,
    ) -> Result<Self, CommandError> {
        Self::ramp(
            Opcode::FrequencyVectorRamp,
            time,
            channel,
            final_value,
            duration,
            Ramp::table(values),
        )
    }

    /// Builds any ramp opcode, checking the generator against it.
    pub fn ramp(
        opcode: Opcode,
        time: u32,
        channel: u32,
        final_value: i32,
        duration: u32,
        ramp: Ramp,
    ) -> Result<Self, CommandError> {
        if !opcode.is_ramp() || opcode.is_vector_ramp() != ramp.is_vector() {
            return Err(CommandError::RampMismatch(opcode));
        }
        if channel >= ADD_CHANNEL {
            return Err(CommandError::ChannelOutOfRange(channel));
        }
        if let Ramp::Vector(table) = &ramp {
            let expected = duration as usize + 1;
            if table.len() != expected {
                return Err(CommandError::VectorLength {
                    expected,
                    actual: table.len(),
                });
            }
        }
        Ok(Self {
            time,
            opcode,
            channel,
            final_value,
            duration,
            ramp: Some(ramp),
        })
    }

    /// Step at which the command becomes eligible.
    #[inline]
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Operation.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Target channel ([`ADD_CHANNEL`] for ChannelAdd, 0 for meta commands).
    #[inline]
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Target value; the trigger id for trigger commands.
    #[inline]
    pub fn final_value(&self) -> i32 {
        self.final_value
    }

    /// Trigger id carried by TriggerStart/TriggerEnd.
    #[inline]
    pub fn trigger_id(&self) -> u32 {
        self.final_value as u32
    }

    /// Ramp length in steps (0 for instantaneous commands).
    #[inline]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Ramp generator, present only for ramp opcodes.
    #[inline]
    pub fn ramp_generator(&self) -> Option<&Ramp> {
        self.ramp.as_ref()
    }

    /// Whether a ramp started at `time` still has steps to run at `now`.
    #[inline]
    pub fn active_at(&self, now: u32) -> bool {
        self.time as u64 + self.duration as u64 > now as u64
    }
}

impl PartialEq for Command {
    /// Compares time, opcode, and the fields that opcode makes meaningful.
    fn eq(&self, other: &Self) -> bool {
        if self.time != other.time || self.opcode != other.opcode {
            return false;
        }
        match self.opcode {
            Opcode::MetaReset | Opcode::MetaResetAll => true,
            Opcode::MetaTriggerEnd | Opcode::MetaTriggerStart => {
                self.final_value == other.final_value
            }
            Opcode::AmplitudeSet
            | Opcode::FrequencySet
            | Opcode::Phase
            | Opcode::ChannelAdd
            | Opcode::ChannelRemove => {
                self.channel == other.channel && self.final_value == other.final_value
            }
            Opcode::AmplitudeRamp
            | Opcode::AmplitudeVectorRamp
            | Opcode::FrequencyRamp
            | Opcode::FrequencyVectorRamp => {
                self.channel == other.channel
                    && self.final_value == other.final_value
                    && self.duration == other.duration
                    && match (&self.ramp, &other.ramp) {
                        (Some(a), Some(b)) => a.same(b),
                        (None, None) => true,
                        _ => false,
                    }
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(t={}", self.opcode, self.time)?;
        match self.opcode {
            Opcode::MetaTriggerEnd | Opcode::MetaTriggerStart => {
                write!(f, ", id={}", self.trigger_id())?;
            }
            Opcode::ChannelRemove => write!(f, ", chn={}", self.channel)?,
            Opcode::AmplitudeSet | Opcode::FrequencySet | Opcode::Phase => {
                write!(f, ", chn={}, val={}", self.channel, self.final_value)?;
            }
            op if op.is_ramp() => write!(
                f,
                ", chn={}, final_val={}, len={}",
                self.channel, self.final_value, self.duration
            )?,
            _ => {}
        }
        f.write_str(")")
    }
}
