//! Per-channel carrier state owned by the generation side.
//!
//! The table is pre-allocated to its fixed maximum, so adding a channel never
//! allocates. Removal swaps the last live channel into the freed slot, which
//! means channel indices are not stable handles across a removal.

use crate::command::Field;
use crate::error::ApplyError;
use crate::kernel::MAX_PHASE;

/// Integer carrier parameters of one output channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    /// Phase in units of `MAX_PHASE` per cycle.
    pub phase: i64,
    /// Frequency in 10 × Hz.
    pub frequency: i32,
    /// Amplitude, full scale at `i32::MAX`.
    pub amplitude: i32,
}

impl ChannelState {
    /// The rampable field `field`.
    #[inline]
    pub fn field_mut(&mut self, field: Field) -> &mut i32 {
        match field {
            Field::Amplitude => &mut self.amplitude,
            Field::Frequency => &mut self.frequency,
        }
    }

    /// Advances phase by one step's worth of carrier cycles.
    ///
    /// A step spans 32 samples of `frequency` plus a linear frequency ramp of
    /// `frequency_delta` across it, which contributes half its value on
    /// average.
    #[inline]
    pub fn advance_phase(&mut self, frequency: i32, frequency_delta: i32) {
        let advance = 32 * frequency as i64 + 16 * frequency_delta as i64;
        self.phase = wrap_phase(self.phase + advance);
    }
}

/// Reduces `phase` modulo [`MAX_PHASE`] when it leaves `[-MAX_PHASE, MAX_PHASE]`.
///
/// Uses Euclidean remainder, so negative phases land in `[0, MAX_PHASE)`
/// rather than being truncated toward zero.
#[inline]
pub fn wrap_phase(phase: i64) -> i64 {
    if phase > MAX_PHASE || phase < -MAX_PHASE {
        phase.rem_euclid(MAX_PHASE)
    } else {
        phase
    }
}

/// Outcome of a channel removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    /// The state that was removed.
    pub state: ChannelState,
    /// Index of the channel that moved into the freed slot, if any.
    pub moved_from: Option<usize>,
}

/// Fixed-capacity table of live channels.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    channels: Vec<ChannelState>,
    max: usize,
}

impl ChannelTable {
    /// Creates an empty table that holds at most `max` channels.
    pub fn new(max: usize) -> Self {
        Self {
            channels: Vec::with_capacity(max),
            max,
        }
    }

    /// Appends a zeroed channel and returns its index.
    pub fn add(&mut self) -> Result<usize, ApplyError> {
        if self.channels.len() >= self.max {
            return Err(ApplyError::ChannelTableFull);
        }
        self.channels.push(ChannelState::default());
        Ok(self.channels.len() - 1)
    }

    /// Removes channel `index`, moving the last channel into its slot.
    pub fn remove(&mut self, index: usize) -> Result<Removed, ApplyError> {
        if index >= self.channels.len() {
            return Err(ApplyError::ChannelOutOfRange);
        }
        let last = self.channels.len() - 1;
        let state = self.channels.swap_remove(index);
        Ok(Removed {
            state,
            moved_from: (index != last).then_some(last),
        })
    }

    /// Drops every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Number of live channels.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel `index`, if live.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&ChannelState> {
        self.channels.get(index)
    }

    /// Mutable channel `index`, if live.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChannelState> {
        self.channels.get_mut(index)
    }

    /// Live channels in index order.
    #[inline]
    pub fn as_slice(&self) -> &[ChannelState] {
        &self.channels
    }

    /// Mutable live channels in index order.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [ChannelState] {
        &mut self.channels
    }
}
