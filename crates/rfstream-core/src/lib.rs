//! rfstream Core - command-driven multi-channel waveform streaming
//!
//! This crate turns a sparse, timestamped stream of per-channel control
//! commands into a dense sample stream for an arbitrary waveform generator,
//! with no locks between the control and generation threads.
//!
//! # Architecture
//!
//! ```text
//! control thread ──▶ command ring ──▶ StepEngine ──▶ kernel ──▶ output ring ──▶ device
//!                                        │   ▲
//!                           ChannelTable ┘   └ RampTracker
//!              TriggerContext / Diagnostics (atomics, both threads)
//! ```
//!
//! ## Commands
//!
//! - [`Command`] - one timestamped control event, built through typed constructors
//! - [`Ramp`] - constant, scalar-callable, or table ramp generator
//! - [`CommandRecord`] - the fixed 20-byte wire form, with [`GeneratorRegistry`]
//!   resolving ramp handles
//!
//! ## Transport
//!
//! - [`ring::channel`] - lock-free SPSC ring with reserve/commit windows
//! - [`Backoff`] - wait policy for full or empty rings, kept outside the ring
//!
//! ## Generation
//!
//! - [`StepEngine`] - per-step state machine (usable directly for offline rendering)
//! - [`ChannelTable`] / [`RampTracker`] - state owned by the generation side
//! - [`kernel`] - SIMD carrier synthesis and fixed-point unit conventions
//! - [`StepOutput`] - one step's waveform and control trace
//!
//! ## Synchronization
//!
//! - [`TriggerContext`] - start/end trigger handshake through atomics
//! - [`Diagnostics`] - underflow and malformed-command counters
//! - [`Stream`] - both rings plus the generation worker thread
//!
//! # Design Principles
//!
//! - **No locks on the hot path**: the rings and the trigger context are the
//!   only shared state
//! - **No panics across the generation boundary**: bad commands become counters
//! - **Deterministic**: identical command sequences produce identical samples

pub mod backoff;
pub mod command;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod ramp;
pub mod record;
pub mod ring;
pub mod state;
pub mod stream;
pub mod trigger;

// Re-export main types at crate root
pub use backoff::Backoff;
pub use command::{ADD_CHANNEL, CHANNEL_BITS, Command, Field, OPCODE_BITS, Opcode, Ramp};
pub use diagnostics::Diagnostics;
pub use engine::StepEngine;
pub use error::{ApplyError, CommandError, StreamError};
pub use kernel::{
    AMP_FACTOR, AMP_SCALE, FREQ_SCALE, MAX_PHASE, PHASE_SCALE, SAMPLE_RATE, SAMPLES_PER_STEP,
    SUBGROUP_LEN, StepOutput,
};
pub use ramp::{ActiveRamp, RampDeltas, RampTracker};
pub use record::{CommandRecord, GeneratorRegistry, RECORD_SIZE, decode_log, encode_log};
pub use ring::{Consumer, Producer};
pub use state::{ChannelState, ChannelTable, wrap_phase};
pub use stream::{CommandWriter, SampleReader, Stream, StreamConfig};
pub use trigger::{EndTrigger, TriggerContext};
