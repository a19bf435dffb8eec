//! The per-step state machine.
//!
//! [`StepEngine::step`] advances simulated time by one step:
//!
//! 1. Stale commands (`time < current_time`) are consumed without output.
//!    The step counts one command underflow when the first of them is not at
//!    time 0.
//! 2. Due meta commands and channel-table edits are applied in order. An unmet
//!    `TriggerStart` holds the engine: the step emits silence, current time
//!    stays at the trigger's time, and the command is retried next step.
//! 3. The end-trigger state machine runs.
//! 4. Each live channel applies its own due amplitude/frequency/phase
//!    commands, evaluates its active ramps, and adds its carrier to the output.
//! 5. Current time advances.
//!
//! Every command goes through one apply primitive, whether consumed as
//! backlog or live. Rejections become diagnostic counters, never panics.
//!
//! ## Ordering of same-time commands
//!
//! Meta commands and channel-table edits at the current time must precede the
//! channel edits, and channel edits must be sorted by channel. Anything left
//! behind once synthesis has passed its channel is consumed as backlog on the
//! next step.

use std::sync::Arc;

use crate::command::{Command, Field, Opcode};
use crate::diagnostics::Diagnostics;
use crate::error::ApplyError;
use crate::kernel::{Accumulator, CarrierParams, SAMPLES_PER_STEP, StepOutput};
use crate::ramp::{ActiveRamp, RampTracker};
use crate::ring::{self, Consumer};
use crate::state::{ChannelState, ChannelTable};
use crate::stream::{CommandWriter, StreamConfig};
use crate::trigger::{EndTrigger, TriggerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Waiting on a start trigger.
    Hold,
}

/// Read cursor over the command ring.
struct CommandCursor {
    rx: Consumer<Command>,
}

impl CommandCursor {
    fn peek(&mut self) -> Option<&Command> {
        if self.rx.reserved().is_empty() {
            let _ = self.rx.reserve_read();
        }
        self.rx.reserved().first()
    }

    fn advance(&mut self) {
        self.rx.commit_read(1);
    }
}

/// Single-threaded step state machine.
///
/// Owns the channel table and active ramps outright. Shares only the trigger
/// context and diagnostics with the control side.
pub struct StepEngine {
    commands: CommandCursor,
    channels: ChannelTable,
    ramps: RampTracker,
    end_trigger: EndTrigger,
    trigger: Arc<TriggerContext>,
    diagnostics: Arc<Diagnostics>,
    cur_t: u32,
    step_count: u64,
    step_time: f64,
}

impl StepEngine {
    /// Creates an engine reading commands from `commands`.
    ///
    /// `step_time` is the global time one step spans, in the unit used by
    /// [`TriggerContext::publish_start_trigger`].
    pub fn new(
        commands: Consumer<Command>,
        max_channels: usize,
        step_time: f64,
        trigger: Arc<TriggerContext>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            commands: CommandCursor { rx: commands },
            channels: ChannelTable::new(max_channels),
            ramps: RampTracker::new(max_channels),
            end_trigger: EndTrigger::default(),
            trigger,
            diagnostics,
            cur_t: 0,
            step_count: 0,
            step_time,
        }
    }

    /// Creates an engine with its own command writer and no output ring,
    /// for offline rendering and tests.
    pub fn offline(config: &StreamConfig) -> (CommandWriter, Self) {
        let (tx, rx) = ring::channel(config.command_capacity);
        let trigger = Arc::new(TriggerContext::new());
        trigger.set_time_offset(config.time_offset);
        let diagnostics = Arc::new(Diagnostics::new(config.strict));
        let engine = Self::new(
            rx,
            config.max_channels,
            config.step_time,
            trigger,
            diagnostics,
        );
        (CommandWriter::new(tx, config.backoff), engine)
    }

    /// Runs one step, writing its output into `out`.
    ///
    /// Returns `false` when the step was held by an unmet start trigger, in
    /// which case `out` is silent.
    pub fn step(&mut self, out: &mut StepOutput) -> bool {
        out.clear();
        let flow = self.consume_due();
        self.end_trigger
            .poll(&self.trigger, self.step_count * SAMPLES_PER_STEP as u64);
        let live = flow == Flow::Continue;
        if live {
            self.synthesize(out);
            self.cur_t = self.cur_t.wrapping_add(1);
        }
        self.step_count += 1;
        live
    }

    /// Current command time in steps.
    pub fn current_time(&self) -> u32 {
        self.cur_t
    }

    /// Steps run since construction, held steps included.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Live channel states in index order.
    pub fn channels(&self) -> &[ChannelState] {
        self.channels.as_slice()
    }

    /// Number of ramps in flight.
    pub fn active_ramps(&self) -> usize {
        self.ramps.len()
    }

    /// Shared trigger state.
    pub fn trigger(&self) -> &Arc<TriggerContext> {
        &self.trigger
    }

    /// Shared diagnostic counters.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    fn global_elapsed(&self) -> u64 {
        (self.step_time * self.step_count as f64) as u64
    }

    /// Applies stale commands and the meta/table commands due now.
    fn consume_due(&mut self) -> Flow {
        let mut caught_up = false;
        loop {
            let Some(cmd) = self.commands.peek() else {
                return Flow::Continue;
            };
            let time = cmd.time();
            if time > self.cur_t {
                return Flow::Continue;
            }
            if time < self.cur_t {
                if self.catch_up(!caught_up) == Flow::Hold {
                    return Flow::Hold;
                }
                caught_up = true;
                continue;
            }
            if cmd.opcode().edits_channel_state() && (cmd.channel() as usize) < self.channels.len()
            {
                // Left for the channel loop.
                return Flow::Continue;
            }
            let cmd = cmd.clone();
            match self.apply(&cmd) {
                Ok(Flow::Hold) => return Flow::Hold,
                Ok(Flow::Continue) => {}
                Err(err) => self.reject(&cmd, err),
            }
            self.commands.advance();
        }
    }

    /// Consumes commands older than the current time without emitting output.
    fn catch_up(&mut self, count_underflow: bool) -> Flow {
        if count_underflow && self.commands.peek().is_some_and(|c| c.time() != 0) {
            self.diagnostics.record_command_underflow();
            #[cfg(feature = "tracing")]
            tracing::debug!("engine: catching up at t={}", self.cur_t);
        }
        while let Some(cmd) = self.commands.peek() {
            if cmd.time() >= self.cur_t {
                break;
            }
            let cmd = cmd.clone();
            match self.apply(&cmd) {
                Ok(Flow::Hold) => return Flow::Hold,
                Ok(Flow::Continue) => {}
                Err(err) => self.reject(&cmd, err),
            }
            self.commands.advance();
        }
        Flow::Continue
    }

    /// Runs the channel loop for the current step.
    fn synthesize(&mut self, out: &mut StepOutput) {
        let mut acc = Accumulator::default();
        let mut i = 0;
        while i < self.channels.len() {
            while let Some(cmd) = self.commands.peek() {
                if cmd.time() != self.cur_t
                    || !cmd.opcode().edits_channel_state()
                    || cmd.channel() as usize != i
                {
                    break;
                }
                let cmd = cmd.clone();
                if let Err(err) = self.apply(&cmd) {
                    self.reject(&cmd, err);
                }
                self.commands.advance();
            }

            let Some(state) = self.channels.get_mut(i) else {
                break;
            };
            let deltas = self.ramps.advance_channel(i, self.cur_t, state);
            acc.add_channel(&CarrierParams::from_integer(
                state.phase,
                state.frequency,
                deltas.frequency,
                state.amplitude,
                deltas.amplitude,
            ));
            out.trace_channel(
                state.amplitude,
                deltas.amplitude,
                state.frequency,
                deltas.frequency,
            );
            state.advance_phase(state.frequency, deltas.frequency);
            i += 1;
        }
        acc.store(&mut out.samples);
    }

    /// Applies one command to engine state.
    fn apply(&mut self, cmd: &Command) -> Result<Flow, ApplyError> {
        match cmd.opcode() {
            Opcode::MetaReset => {
                self.ramps.finalize_all(self.channels.as_mut_slice());
                self.cur_t = 0;
            }
            Opcode::MetaResetAll => {
                self.diagnostics.clear_underflow();
                self.channels.clear();
                self.ramps.clear();
                self.trigger.set_slow_mode(false);
                self.cur_t = 0;
            }
            Opcode::MetaTriggerEnd => self.end_trigger.arm(cmd.trigger_id()),
            Opcode::MetaTriggerStart => {
                if !self.check_start(cmd.time(), cmd.trigger_id()) {
                    return Ok(Flow::Hold);
                }
            }
            Opcode::ChannelAdd => {
                self.channels.add()?;
            }
            Opcode::ChannelRemove => {
                let index = cmd.channel() as usize;
                let removed = self.channels.remove(index)?;
                self.ramps.on_channel_removed(index, removed.moved_from);
            }
            Opcode::AmplitudeSet => self.apply_set(cmd, Field::Amplitude)?,
            Opcode::FrequencySet => self.apply_set(cmd, Field::Frequency)?,
            Opcode::AmplitudeRamp | Opcode::AmplitudeVectorRamp => {
                self.apply_ramp(cmd, Field::Amplitude)?;
            }
            Opcode::FrequencyRamp | Opcode::FrequencyVectorRamp => {
                self.apply_ramp(cmd, Field::Frequency)?;
            }
            Opcode::Phase => {
                self.channel_mut(cmd)?.phase = cmd.final_value() as i64;
            }
        }
        Ok(Flow::Continue)
    }

    fn channel_mut(&mut self, cmd: &Command) -> Result<&mut ChannelState, ApplyError> {
        self.channels
            .get_mut(cmd.channel() as usize)
            .ok_or(ApplyError::ChannelOutOfRange)
    }

    fn apply_set(&mut self, cmd: &Command, field: Field) -> Result<(), ApplyError> {
        *self.channel_mut(cmd)?.field_mut(field) = cmd.final_value();
        self.ramps.cancel(cmd.channel() as usize, field);
        Ok(())
    }

    fn apply_ramp(&mut self, cmd: &Command, field: Field) -> Result<(), ApplyError> {
        let index = cmd.channel() as usize;
        let now = self.cur_t;
        let state = self
            .channels
            .get_mut(index)
            .ok_or(ApplyError::ChannelOutOfRange)?;
        if cmd.active_at(now) {
            if let Some(mut ramp) = ActiveRamp::from_command(cmd) {
                *state.field_mut(field) = ramp.eval_at(now).0;
                self.ramps.register(index, field, ramp);
                return Ok(());
            }
        }
        // Window already elapsed: behaves as a Set to the final value.
        *state.field_mut(field) = cmd.final_value();
        self.ramps.cancel(index, field);
        Ok(())
    }

    /// Start-trigger handshake. Re-bases current time to the command's time.
    fn check_start(&mut self, time: u32, id: u32) -> bool {
        self.cur_t = time;
        let reached = self.trigger.start_reached(id, self.global_elapsed());
        #[cfg(feature = "tracing")]
        if reached == self.trigger.is_in_slow_mode() {
            if reached {
                tracing::info!("trigger: start id {id} reached at step {}", self.step_count);
            } else {
                tracing::debug!("trigger: waiting for start id {id}");
            }
        }
        self.trigger.set_slow_mode(!reached);
        reached
    }

    fn reject(&self, cmd: &Command, err: ApplyError) {
        #[cfg(feature = "tracing")]
        tracing::warn!("engine: rejected {cmd}: {err}");
        #[cfg(not(feature = "tracing"))]
        let _ = cmd;
        self.diagnostics.record_apply_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Ramp;

    fn engine() -> (CommandWriter, StepEngine) {
        StepEngine::offline(&StreamConfig {
            max_channels: 4,
            command_capacity: 64,
            ..StreamConfig::default()
        })
    }

    fn send(writer: &mut CommandWriter, cmds: &[Command]) {
        assert_eq!(writer.write_commands(cmds), cmds.len());
        writer.flush();
    }

    fn run(engine: &mut StepEngine, steps: usize) -> Vec<StepOutput> {
        let mut out = StepOutput::default();
        (0..steps)
            .map(|_| {
                engine.step(&mut out);
                out
            })
            .collect()
    }

    #[test]
    fn empty_engine_is_silent_and_advances() {
        let (_w, mut eng) = engine();
        let outs = run(&mut eng, 3);
        assert!(outs.iter().all(StepOutput::is_silent));
        assert_eq!(eng.current_time(), 3);
        assert_eq!(eng.diagnostics().command_underflow(), 0);
    }

    #[test]
    fn future_commands_wait() {
        let (mut w, mut eng) = engine();
        send(
            &mut w,
            &[Command::channel_add(2), Command::amplitude_set(2, 0, 1000)],
        );
        run(&mut eng, 2);
        assert!(eng.channels().is_empty());
        run(&mut eng, 1);
        assert_eq!(eng.channels()[0].amplitude, 1000);
    }

    #[test]
    fn trace_reports_ramp_sub_groups() {
        let (mut w, mut eng) = engine();
        let ramp = Command::amplitude_ramp(0, 0, 400, 4, Ramp::linear(0, 400, 4)).unwrap();
        send(&mut w, &[Command::channel_add(0), ramp]);
        let outs = run(&mut eng, 6);
        assert_eq!(outs[0].amplitude, [0, 50]);
        assert_eq!(outs[1].amplitude, [100, 150]);
        assert_eq!(outs[3].amplitude, [300, 350]);
        assert_eq!(outs[4].amplitude, [400, 400]);
        assert_eq!(eng.active_ramps(), 0);
    }

    #[test]
    fn set_cancels_running_ramp() {
        let (mut w, mut eng) = engine();
        let ramp = Command::frequency_ramp(0, 0, 1000, 10, Ramp::linear(0, 1000, 10)).unwrap();
        send(
            &mut w,
            &[
                Command::channel_add(0),
                ramp,
                Command::frequency_set(3, 0, 77),
            ],
        );
        let outs = run(&mut eng, 6);
        assert_eq!(outs[2].frequency[0], 200);
        assert_eq!(outs[3].frequency, [77, 77]);
        assert_eq!(outs[5].frequency, [77, 77]);
        assert_eq!(eng.active_ramps(), 0);
    }

    #[test]
    fn elapsed_ramp_applies_as_set() {
        let (mut w, mut eng) = engine();
        send(&mut w, &[Command::channel_add(0)]);
        run(&mut eng, 10);
        let ramp = Command::amplitude_ramp(2, 0, 55, 3, Ramp::Constant(1)).unwrap();
        send(&mut w, &[ramp]);
        run(&mut eng, 1);
        assert_eq!(eng.channels()[0].amplitude, 55);
        assert_eq!(eng.active_ramps(), 0);
    }

    #[test]
    fn reset_rebases_time_and_finalizes_ramps() {
        let (mut w, mut eng) = engine();
        let ramp = Command::amplitude_ramp(0, 0, 900, 100, Ramp::linear(0, 900, 100)).unwrap();
        send(
            &mut w,
            &[Command::channel_add(0), ramp, Command::reset(5)],
        );
        run(&mut eng, 6);
        assert_eq!(eng.current_time(), 1);
        assert_eq!(eng.channels()[0].amplitude, 900);
        assert_eq!(eng.active_ramps(), 0);
    }

    #[test]
    fn reset_all_clears_channels_and_counters() {
        let (mut w, mut eng) = engine();
        send(&mut w, &[Command::channel_add(0), Command::channel_add(0)]);
        run(&mut eng, 4);
        send(&mut w, &[Command::amplitude_set(1, 0, 5)]);
        run(&mut eng, 1);
        assert_eq!(eng.diagnostics().command_underflow(), 1);

        send(&mut w, &[Command::reset_all(5)]);
        run(&mut eng, 1);
        assert!(eng.channels().is_empty());
        assert_eq!(eng.diagnostics().command_underflow(), 0);
        assert_eq!(eng.current_time(), 1);
    }

    #[test]
    fn out_of_range_channel_is_counted_not_applied() {
        let (mut w, mut eng) = engine();
        send(
            &mut w,
            &[
                Command::channel_add(0),
                Command::amplitude_set(0, 3, 10),
                Command::channel_remove(0, 9),
            ],
        );
        run(&mut eng, 1);
        assert_eq!(eng.channels().len(), 1);
        assert_eq!(eng.channels()[0].amplitude, 0);
        assert_eq!(eng.diagnostics().malformed_commands(), 2);
        assert_eq!(eng.diagnostics().fault(), None);
    }

    #[test]
    fn strict_mode_latches_table_overflow() {
        let (mut w, mut eng) = StepEngine::offline(&StreamConfig {
            max_channels: 1,
            strict: true,
            ..StreamConfig::default()
        });
        send(&mut w, &[Command::channel_add(0), Command::channel_add(0)]);
        run(&mut eng, 1);
        assert_eq!(eng.channels().len(), 1);
        assert_eq!(eng.diagnostics().fault(), Some(ApplyError::ChannelTableFull));
    }

    #[test]
    fn phase_command_overwrites_and_advances() {
        let (mut w, mut eng) = engine();
        send(
            &mut w,
            &[
                Command::channel_add(0),
                Command::frequency_set(0, 0, 1000),
                Command::phase(0, 0, 500),
            ],
        );
        run(&mut eng, 2);
        assert_eq!(eng.channels()[0].phase, 500 + 2 * 32_000);
    }

    #[test]
    fn out_of_order_channel_edit_becomes_backlog() {
        let (mut w, mut eng) = engine();
        send(&mut w, &[Command::channel_add(0), Command::channel_add(0)]);
        run(&mut eng, 1);
        send(
            &mut w,
            &[
                Command::amplitude_set(1, 1, 10),
                Command::amplitude_set(1, 0, 20),
            ],
        );
        run(&mut eng, 1);
        assert_eq!(eng.channels()[1].amplitude, 10);
        assert_eq!(eng.channels()[0].amplitude, 0);
        run(&mut eng, 1);
        assert_eq!(eng.channels()[0].amplitude, 20);
        assert_eq!(eng.diagnostics().command_underflow(), 1);
    }
}
