//! 20-byte packed command record and command-log codec.
//!
//! Stored and replayed command logs use a fixed little-endian layout:
//!
//! | Offset | Width | Field |
//! |--------|-------|-------|
//! | 0 | u32 | time |
//! | 4 | u32 | opcode (low 4 bits) + channel (high 28 bits) |
//! | 8 | i32 | final value / trigger id |
//! | 12 | f32 | ramp duration in steps |
//! | 16 | u32 | generator handle (0 = none) |
//!
//! Generators cannot live in a byte stream, so ramps travel as handles into a
//! [`GeneratorRegistry`] that both ends share out of band. The handle is an
//! index, not an address, so 32 bits are enough to keep the record at 20 bytes.

use std::collections::BTreeMap;

use crate::command::{ADD_CHANNEL, CHANNEL_BITS, Command, OPCODE_BITS, Opcode, Ramp};
use crate::error::CommandError;

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 20;

const OPCODE_MASK: u32 = (1 << OPCODE_BITS) - 1;

/// Raw wire form of one command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommandRecord {
    /// Step at which the command becomes eligible.
    pub time: u32,
    /// Opcode in the low 4 bits, channel in the high 28.
    pub op_channel: u32,
    /// Target value or trigger id.
    pub final_value: i32,
    /// Ramp duration in steps.
    pub duration: f32,
    /// Generator handle, 0 when the command has none.
    pub generator: u32,
}

impl CommandRecord {
    /// Packs the opcode/channel word. Channel bits above 28 are dropped.
    pub fn new(
        time: u32,
        opcode_bits: u8,
        channel: u32,
        final_value: i32,
        duration: f32,
        generator: u32,
    ) -> Self {
        Self {
            time,
            op_channel: (opcode_bits as u32 & OPCODE_MASK) | (channel << OPCODE_BITS),
            final_value,
            duration,
            generator,
        }
    }

    /// Raw 4-bit opcode value.
    #[inline]
    pub fn opcode_bits(&self) -> u8 {
        (self.op_channel & OPCODE_MASK) as u8
    }

    /// Decoded opcode.
    pub fn opcode(&self) -> Result<Opcode, CommandError> {
        Opcode::from_bits(self.opcode_bits()).ok_or(CommandError::UnknownOpcode(self.opcode_bits()))
    }

    /// 28-bit channel field.
    #[inline]
    pub fn channel(&self) -> u32 {
        self.op_channel >> OPCODE_BITS
    }

    /// Serializes to the 20-byte little-endian layout.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.time.to_le_bytes());
        out[4..8].copy_from_slice(&self.op_channel.to_le_bytes());
        out[8..12].copy_from_slice(&self.final_value.to_le_bytes());
        out[12..16].copy_from_slice(&self.duration.to_le_bytes());
        out[16..20].copy_from_slice(&self.generator.to_le_bytes());
        out
    }

    /// Deserializes from the 20-byte little-endian layout.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Self {
            time: u32::from_le_bytes(word(0)),
            op_channel: u32::from_le_bytes(word(4)),
            final_value: i32::from_le_bytes(word(8)),
            duration: f32::from_le_bytes(word(12)),
            generator: u32::from_le_bytes(word(16)),
        }
    }
}

/// Concatenates records into a command log.
pub fn encode_log(records: &[CommandRecord]) -> Vec<u8> {
    records.iter().flat_map(CommandRecord::to_bytes).collect()
}

/// Splits a command log into records.
pub fn decode_log(bytes: &[u8]) -> Result<Vec<CommandRecord>, CommandError> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(CommandError::Truncated(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; RECORD_SIZE];
            raw.copy_from_slice(chunk);
            CommandRecord::from_bytes(&raw)
        })
        .collect())
}

/// Maps wire generator handles to ramps.
///
/// Handles start at 1; registering the same ramp twice (by identity) returns
/// the handle it already has.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRegistry {
    ramps: BTreeMap<u32, Ramp>,
    next: u32,
}

impl GeneratorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            ramps: BTreeMap::new(),
            next: 1,
        }
    }

    /// Registers `ramp`, returning its handle.
    pub fn register(&mut self, ramp: &Ramp) -> u32 {
        if let Some((&handle, _)) = self.ramps.iter().find(|(_, r)| r.same(ramp)) {
            return handle;
        }
        let handle = self.next.max(1);
        self.next = handle + 1;
        self.ramps.insert(handle, ramp.clone());
        handle
    }

    /// Installs `ramp` under a known handle (e.g. loaded from a sidecar file).
    pub fn insert(&mut self, handle: u32, ramp: Ramp) {
        self.next = self.next.max(handle.saturating_add(1));
        self.ramps.insert(handle, ramp);
    }

    /// Looks up a handle.
    pub fn get(&self, handle: u32) -> Option<&Ramp> {
        self.ramps.get(&handle)
    }

    /// Number of registered generators.
    pub fn len(&self) -> usize {
        self.ramps.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ramps.is_empty()
    }

    /// Iterates `(handle, ramp)` in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Ramp)> {
        self.ramps.iter().map(|(&h, r)| (h, r))
    }

    /// Encodes a command, registering its generator if it has one.
    pub fn encode(&mut self, cmd: &Command) -> Result<CommandRecord, CommandError> {
        let channel = cmd.channel();
        if channel > ADD_CHANNEL || (channel == ADD_CHANNEL && cmd.opcode() != Opcode::ChannelAdd)
        {
            return Err(CommandError::ChannelOutOfRange(channel));
        }
        let duration = steps_to_wire(cmd.duration())?;
        let generator = cmd.ramp_generator().map_or(0, |r| self.register(r));
        Ok(CommandRecord::new(
            cmd.time(),
            cmd.opcode().bits(),
            channel,
            cmd.final_value(),
            duration,
            generator,
        ))
    }

    /// Decodes a record back into a command.
    pub fn decode(&self, record: &CommandRecord) -> Result<Command, CommandError> {
        let opcode = record.opcode()?;
        let t = record.time;
        let chn = record.channel();
        let value = record.final_value;
        Ok(match opcode {
            Opcode::MetaReset => Command::reset(t),
            Opcode::MetaResetAll => Command::reset_all(t),
            Opcode::MetaTriggerEnd => Command::trigger_end(t, value as u32),
            Opcode::MetaTriggerStart => Command::trigger_start(t, value as u32),
            Opcode::AmplitudeSet => Command::amplitude_set(t, chn, value),
            Opcode::FrequencySet => Command::frequency_set(t, chn, value),
            Opcode::Phase => Command::phase(t, chn, value),
            Opcode::ChannelAdd => Command::channel_add(t),
            Opcode::ChannelRemove => Command::channel_remove(t, chn),
            Opcode::AmplitudeRamp
            | Opcode::AmplitudeVectorRamp
            | Opcode::FrequencyRamp
            | Opcode::FrequencyVectorRamp => {
                let duration = steps_from_wire(record.duration)?;
                let ramp = self
                    .get(record.generator)
                    .cloned()
                    .ok_or(CommandError::MissingGenerator(record.generator))?;
                Command::ramp(opcode, t, chn, value, duration, ramp)?
            }
        })
    }
}

/// Step counts above 2^24 lose precision in an `f32`.
fn steps_to_wire(steps: u32) -> Result<f32, CommandError> {
    let wire = steps as f32;
    if wire as u32 != steps {
        return Err(CommandError::DurationTooLong(steps));
    }
    Ok(wire)
}

/// Wire durations must be whole, finite, non-negative step counts.
fn steps_from_wire(duration: f32) -> Result<u32, CommandError> {
    if !duration.is_finite()
        || duration < 0.0
        || duration.fract() != 0.0
        || duration > u32::MAX as f32
    {
        return Err(CommandError::InvalidDuration(duration));
    }
    Ok(duration as u32)
}

const _: () = assert!(CHANNEL_BITS + OPCODE_BITS == 32);
