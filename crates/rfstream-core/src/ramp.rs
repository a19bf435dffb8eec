//! In-flight ramp bookkeeping.
//!
//! An [`ActiveRamp`] exists for every amplitude or frequency ramp whose window
//! `[time, time + duration)` still covers the current step. The tracker keeps
//! at most one per (channel, field): a newer ramp or a Set on the same field
//! replaces it.
//!
//! Storage is indexed by channel and sized to the channel-table capacity at
//! construction, so registering and looking up ramps never allocates. Scalar
//! generators grow a value cache as the ramp advances.

use std::sync::Arc;

use crate::command::{Command, Field, Ramp, ScalarFn};
use crate::state::ChannelState;

enum Values {
    Constant(i32),
    Cached { generator: Arc<ScalarFn>, cache: Vec<i32> },
    Table(Arc<[i32]>),
}

/// One ramp that is still running.
pub struct ActiveRamp {
    start: u32,
    duration: u32,
    final_value: i32,
    values: Values,
}

impl ActiveRamp {
    /// Activates the ramp carried by `cmd`. Returns `None` for non-ramp commands.
    pub fn from_command(cmd: &Command) -> Option<Self> {
        let values = match cmd.ramp_generator()? {
            Ramp::Constant(v) => Values::Constant(*v),
            Ramp::Scalar(f) => Values::Cached {
                generator: Arc::clone(f),
                cache: Vec::new(),
            },
            Ramp::Vector(t) => Values::Table(Arc::clone(t)),
        };
        Some(Self {
            start: cmd.time(),
            duration: cmd.duration(),
            final_value: cmd.final_value(),
            values,
        })
    }

    /// Whether the window still covers step `now`.
    #[inline]
    pub fn is_active_at(&self, now: u32) -> bool {
        self.start as u64 + self.duration as u64 > now as u64
    }

    /// Value written once the window elapses.
    #[inline]
    pub fn final_value(&self) -> i32 {
        self.final_value
    }

    /// Value at step `now` and its change over the following step.
    pub fn eval_at(&mut self, now: u32) -> (i32, i32) {
        self.eval(now.saturating_sub(self.start))
    }

    /// Value at `offset` steps into the ramp and its change to `offset + 1`.
    pub fn eval(&mut self, offset: u32) -> (i32, i32) {
        match &mut self.values {
            Values::Constant(v) => (*v, 0),
            Values::Cached { generator, cache } => {
                let needed = offset as usize + 2;
                while cache.len() < needed {
                    cache.push(generator(cache.len() as u32));
                }
                let v = cache[offset as usize];
                (v, cache[offset as usize + 1].wrapping_sub(v))
            }
            Values::Table(table) => {
                let at = |i: usize| table.get(i).or_else(|| table.last()).copied().unwrap_or(0);
                let v = at(offset as usize);
                (v, at(offset as usize + 1).wrapping_sub(v))
            }
        }
    }
}

/// Evaluated ramp contribution for one channel at one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampDeltas {
    /// Amplitude change across the step.
    pub amplitude: i32,
    /// Frequency change across the step.
    pub frequency: i32,
}

type Slot = [Option<ActiveRamp>; 2];

#[inline]
fn field_index(field: Field) -> usize {
    match field {
        Field::Amplitude => 0,
        Field::Frequency => 1,
    }
}

/// Active ramps, indexed by channel and field.
pub struct RampTracker {
    slots: Vec<Slot>,
    active: usize,
}

impl RampTracker {
    /// Creates a tracker for up to `max_channels` channels.
    pub fn new(max_channels: usize) -> Self {
        Self {
            slots: (0..max_channels).map(|_| [None, None]).collect(),
            active: 0,
        }
    }

    /// Number of ramps currently tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.active
    }

    /// True when no ramp is running.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Whether `channel` has a running ramp on `field`.
    pub fn is_tracking(&self, channel: usize, field: Field) -> bool {
        self.slots
            .get(channel)
            .is_some_and(|s| s[field_index(field)].is_some())
    }

    /// Installs `ramp` on (channel, field), replacing any earlier one.
    pub fn register(&mut self, channel: usize, field: Field, ramp: ActiveRamp) {
        if let Some(slot) = self.slots.get_mut(channel) {
            if slot[field_index(field)].replace(ramp).is_none() {
                self.active += 1;
            }
        }
    }

    /// Drops the ramp on (channel, field), if any.
    pub fn cancel(&mut self, channel: usize, field: Field) {
        if let Some(slot) = self.slots.get_mut(channel) {
            if slot[field_index(field)].take().is_some() {
                self.active -= 1;
            }
        }
    }

    /// Evaluates `channel`'s ramps at step `now`, writing current values into
    /// `state`. Elapsed ramps write their final value and are dropped.
    pub fn advance_channel(
        &mut self,
        channel: usize,
        now: u32,
        state: &mut ChannelState,
    ) -> RampDeltas {
        let mut deltas = RampDeltas::default();
        let Some(slot) = self.slots.get_mut(channel) else {
            return deltas;
        };
        for (entry, field) in slot.iter_mut().zip([Field::Amplitude, Field::Frequency]) {
            let Some(ramp) = entry else { continue };
            if ramp.is_active_at(now) {
                let (value, delta) = ramp.eval_at(now);
                *state.field_mut(field) = value;
                match field {
                    Field::Amplitude => deltas.amplitude = delta,
                    Field::Frequency => deltas.frequency = delta,
                }
            } else {
                *state.field_mut(field) = ramp.final_value();
                *entry = None;
                self.active -= 1;
            }
        }
        deltas
    }

    /// Updates bookkeeping after channel `removed` was swapped out.
    ///
    /// The removed channel's ramps are dropped; ramps of `moved_from` follow
    /// that channel into slot `removed`.
    pub fn on_channel_removed(&mut self, removed: usize, moved_from: Option<usize>) {
        let Some(slot) = self.slots.get_mut(removed) else {
            return;
        };
        let dropped = slot.iter().filter(|r| r.is_some()).count();
        *slot = [None, None];
        self.active -= dropped;
        if let Some(from) = moved_from {
            if from < self.slots.len() {
                self.slots.swap(removed, from);
            }
        }
    }

    /// Writes every ramp's final value into `states` and drops all ramps.
    pub fn finalize_all(&mut self, states: &mut [ChannelState]) {
        if self.active == 0 {
            return;
        }
        for (slot, state) in self.slots.iter_mut().zip(states.iter_mut()) {
            for (entry, field) in slot.iter_mut().zip([Field::Amplitude, Field::Frequency]) {
                if let Some(ramp) = entry.take() {
                    *state.field_mut(field) = ramp.final_value();
                }
            }
        }
        self.clear();
    }

    /// Drops every ramp without touching channel state.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = [None, None];
        }
        self.active = 0;
    }
}
