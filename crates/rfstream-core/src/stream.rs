//! Two-thread streaming: control thread in, generation thread out.
//!
//! A [`Stream`] owns both ring buffers and the generation worker. The control
//! side writes [`Command`]s through a [`CommandWriter`] and the device side
//! drains `i16` samples through a [`SampleReader`]. The worker runs
//! [`StepEngine::step`] in pages of `steps_per_page` steps. It checks the stop
//! flag between pages and while waiting on a full output ring. Steps enter
//! the ring whole, so a stop never lands mid-step.
//!
//! ```rust,ignore
//! use rfstream_core::{Command, Stream, StreamConfig};
//!
//! let mut stream = Stream::start(StreamConfig::default())?;
//! stream.add_command(Command::channel_add(0));
//! stream.add_command(Command::amplitude_set(0, 0, i32::MAX / 2));
//! stream.flush();
//!
//! let ready = stream.borrow_ready_samples().len();
//! stream.release_samples(ready);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::backoff::Backoff;
use crate::command::Command;
use crate::diagnostics::Diagnostics;
use crate::engine::StepEngine;
use crate::error::{ApplyError, StreamError};
use crate::kernel::{SAMPLE_RATE, SAMPLES_PER_STEP, StepOutput};
use crate::ring::{self, Consumer, Producer};
use crate::trigger::TriggerContext;

/// Stream construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Channel-table capacity.
    pub max_channels: usize,
    /// Command ring slots.
    pub command_capacity: usize,
    /// Output ring samples. [`Stream::new`] rounds this up to a whole
    /// number of steps.
    pub output_capacity: usize,
    /// Steps generated between stop-flag checks.
    pub steps_per_page: usize,
    /// Global time one step spans, in the start-trigger time unit.
    pub step_time: f64,
    /// Initial global time offset for start triggers.
    pub time_offset: i64,
    /// Latch the first apply error into [`Diagnostics::fault`].
    pub strict: bool,
    /// Wait policy on full or empty rings.
    pub backoff: Backoff,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_channels: 128,
            command_capacity: 1024,
            output_capacity: 1 << 20,
            steps_per_page: 16,
            // Nanoseconds per step at the native sample rate.
            step_time: SAMPLES_PER_STEP as f64 * 1e9 / SAMPLE_RATE as f64,
            time_offset: 0,
            strict: false,
            backoff: Backoff::default(),
        }
    }
}

/// Control-side command writer with batched publication.
///
/// Written commands stay invisible to the engine until the current ring
/// window fills or [`flush`](Self::flush) is called.
pub struct CommandWriter {
    tx: Producer<Command>,
    staged: usize,
    backoff: Backoff,
}

impl CommandWriter {
    pub(crate) fn new(tx: Producer<Command>, backoff: Backoff) -> Self {
        Self {
            tx,
            staged: 0,
            backoff,
        }
    }

    /// Free slots available for writing, capped at `max`.
    pub fn reserve_command_slots(&mut self, max: usize) -> usize {
        let window = self.tx.reserve_write().len();
        window.saturating_sub(self.staged).min(max)
    }

    /// Stages as many of `batch` as fit and returns how many were taken.
    pub fn write_commands(&mut self, batch: &[Command]) -> usize {
        let window = self.tx.reserve_write();
        let free = window.len().saturating_sub(self.staged);
        let n = free.min(batch.len());
        window[self.staged..self.staged + n].clone_from_slice(&batch[..n]);
        self.staged += n;
        if n > 0 && self.staged == window.len() {
            self.tx.commit_write(self.staged);
            self.staged = 0;
        }
        n
    }

    /// Publishes staged commands.
    pub fn flush(&mut self) {
        if self.staged > 0 {
            self.tx.commit_write(self.staged);
            self.staged = 0;
        }
    }

    /// Stages one command if a slot is free.
    pub fn try_add_command(&mut self, cmd: Command) -> bool {
        self.write_commands(core::slice::from_ref(&cmd)) == 1
    }

    /// Stages one command, waiting for a free slot.
    pub fn add_command(&mut self, cmd: Command) {
        let backoff = self.backoff;
        backoff.retry(|| self.try_add_command(cmd.clone()).then_some(()));
    }

    /// Commands staged but not yet published.
    pub fn staged(&self) -> usize {
        self.staged
    }
}

/// Device-side sample reader.
pub struct SampleReader {
    rx: Consumer<i16>,
    trigger: Arc<TriggerContext>,
    released: u64,
}

impl SampleReader {
    fn new(rx: Consumer<i16>, trigger: Arc<TriggerContext>) -> Self {
        Self {
            rx,
            trigger,
            released: 0,
        }
    }

    /// Borrows the contiguous run of ready samples.
    pub fn borrow_ready_samples(&mut self) -> &[i16] {
        self.rx.reserve_read()
    }

    /// Returns `count` borrowed samples to the generator.
    ///
    /// Releasing past a waiting end-trigger position clears it, which lets the
    /// engine publish the trigger as fired.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the last borrowed run.
    pub fn release_samples(&mut self, count: usize) {
        self.rx.commit_read(count);
        self.released += count as u64;
        self.trigger.release_through(self.released);
    }

    /// Total samples released since construction.
    pub fn released(&self) -> u64 {
        self.released
    }
}

/// The generation side: engine plus output ring.
///
/// Steps enter the output ring whole. A step generated while the ring is
/// full stays pending across a stop and is written first on the next run,
/// so the ring position always equals `step_count * SAMPLES_PER_STEP`.
struct Generator {
    engine: StepEngine,
    tx: Producer<i16>,
    steps_per_page: usize,
    backoff: Backoff,
    out: StepOutput,
    pending: Option<[i16; SAMPLES_PER_STEP]>,
}

impl Generator {
    fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            for _ in 0..self.steps_per_page {
                if !self.push_step(stop) {
                    return;
                }
            }
        }
    }

    /// Commits the pending step, generating it first if needed. Returns
    /// `false` with the step still pending when a stop arrives while the
    /// ring has no room for it.
    fn push_step(&mut self, stop: &AtomicBool) -> bool {
        let samples = match self.pending {
            Some(samples) => samples,
            None => {
                self.engine.step(&mut self.out);
                let mut samples = [0i16; SAMPLES_PER_STEP];
                self.out.write_i16(&mut samples);
                self.pending = Some(samples);
                samples
            }
        };
        let mut attempt = 0u32;
        loop {
            let window = self.tx.reserve_write();
            if window.len() >= SAMPLES_PER_STEP {
                window[..SAMPLES_PER_STEP].copy_from_slice(&samples);
                self.tx.commit_write(SAMPLES_PER_STEP);
                self.pending = None;
                return true;
            }
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            self.backoff.wait(attempt);
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Command-driven waveform stream with a background generation worker.
pub struct Stream {
    writer: CommandWriter,
    reader: SampleReader,
    trigger: Arc<TriggerContext>,
    diagnostics: Arc<Diagnostics>,
    stop: Arc<AtomicBool>,
    idle: Option<Generator>,
    worker: Option<JoinHandle<Generator>>,
}

impl Stream {
    /// Builds a stream without starting the worker.
    ///
    /// # Panics
    ///
    /// Panics if `command_capacity` or `output_capacity` is zero.
    pub fn new(config: StreamConfig) -> Self {
        let (cmd_tx, cmd_rx) = ring::channel(config.command_capacity);
        let (out_tx, out_rx) =
            ring::channel(config.output_capacity.next_multiple_of(SAMPLES_PER_STEP));
        let trigger = Arc::new(TriggerContext::new());
        trigger.set_time_offset(config.time_offset);
        let diagnostics = Arc::new(Diagnostics::new(config.strict));

        let engine = StepEngine::new(
            cmd_rx,
            config.max_channels,
            config.step_time,
            Arc::clone(&trigger),
            Arc::clone(&diagnostics),
        );
        let generator = Generator {
            engine,
            tx: out_tx,
            steps_per_page: config.steps_per_page.max(1),
            backoff: config.backoff,
            out: StepOutput::default(),
            pending: None,
        };

        Self {
            writer: CommandWriter::new(cmd_tx, config.backoff),
            reader: SampleReader::new(out_rx, Arc::clone(&trigger)),
            trigger,
            diagnostics,
            stop: Arc::new(AtomicBool::new(false)),
            idle: Some(generator),
            worker: None,
        }
    }

    /// Builds a stream and starts its worker.
    pub fn start(config: StreamConfig) -> Result<Self, StreamError> {
        let mut stream = Self::new(config);
        stream.start_worker()?;
        Ok(stream)
    }

    /// Starts the generation worker.
    pub fn start_worker(&mut self) -> Result<(), StreamError> {
        if self.worker.is_some() {
            return Err(StreamError::AlreadyRunning);
        }
        let mut generator = self.idle.take().ok_or(StreamError::EngineLost)?;
        self.stop.store(false, Ordering::Relaxed);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name("rfstream-gen".into())
            .spawn(move || {
                generator.run(&stop);
                generator
            })?;
        self.worker = Some(handle);
        #[cfg(feature = "tracing")]
        tracing::info!("stream: generation worker started");
        Ok(())
    }

    /// Stops the worker and waits for it. The engine is kept, so the worker
    /// can be restarted with its state intact.
    pub fn stop_worker(&mut self) -> Result<(), StreamError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Relaxed);
        let generator = handle.join().map_err(|_| StreamError::WorkerPanicked)?;
        self.idle = Some(generator);
        #[cfg(feature = "tracing")]
        tracing::info!("stream: generation worker stopped");
        Ok(())
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Free command slots, capped at `max`.
    pub fn reserve_command_slots(&mut self, max: usize) -> usize {
        self.writer.reserve_command_slots(max)
    }

    /// Stages as many of `batch` as fit; see [`CommandWriter::write_commands`].
    pub fn write_commands(&mut self, batch: &[Command]) -> usize {
        self.writer.write_commands(batch)
    }

    /// Publishes staged commands.
    pub fn flush(&mut self) {
        self.writer.flush();
    }

    /// Stages one command if a slot is free.
    pub fn try_add_command(&mut self, cmd: Command) -> bool {
        self.writer.try_add_command(cmd)
    }

    /// Stages one command, waiting for a free slot.
    pub fn add_command(&mut self, cmd: Command) {
        self.writer.add_command(cmd);
    }

    /// Borrows the contiguous run of ready samples.
    pub fn borrow_ready_samples(&mut self) -> &[i16] {
        self.reader.borrow_ready_samples()
    }

    /// Returns `count` borrowed samples to the generator.
    pub fn release_samples(&mut self, count: usize) {
        self.reader.release_samples(count);
    }

    /// Splits into the control-side writer and the device-side reader so
    /// they can run on separate threads.
    pub fn split(&mut self) -> (&mut CommandWriter, &mut SampleReader) {
        (&mut self.writer, &mut self.reader)
    }

    /// Shared trigger state.
    pub fn trigger(&self) -> &Arc<TriggerContext> {
        &self.trigger
    }

    /// Shared diagnostic counters.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// See [`TriggerContext::allocate_start_trigger_id`].
    pub fn allocate_start_trigger_id(&self) -> u32 {
        self.trigger.allocate_start_trigger_id()
    }

    /// See [`TriggerContext::allocate_end_trigger_id`].
    pub fn allocate_end_trigger_id(&self) -> u32 {
        self.trigger.allocate_end_trigger_id()
    }

    /// See [`TriggerContext::publish_start_trigger`].
    pub fn publish_start_trigger(&self, id: u32, global_time: u64) {
        self.trigger.publish_start_trigger(id, global_time);
    }

    /// See [`TriggerContext::is_in_slow_mode`].
    pub fn is_in_slow_mode(&self) -> bool {
        self.trigger.is_in_slow_mode()
    }

    /// See [`TriggerContext::triggered_end_id`].
    pub fn triggered_end_id(&self) -> u32 {
        self.trigger.triggered_end_id()
    }

    /// See [`TriggerContext::set_time_offset`].
    pub fn set_time_offset(&self, offset: i64) {
        self.trigger.set_time_offset(offset);
    }

    /// See [`TriggerContext::end_trigger_position`].
    pub fn end_trigger_position(&self) -> Option<u64> {
        self.trigger.end_trigger_position()
    }

    /// See [`Diagnostics::command_underflow`].
    pub fn command_underflow(&self) -> u64 {
        self.diagnostics.command_underflow()
    }

    /// See [`Diagnostics::sample_underflow`].
    pub fn sample_underflow(&self) -> u64 {
        self.diagnostics.sample_underflow()
    }

    /// See [`Diagnostics::record_sample_underflow`].
    pub fn record_sample_underflow(&self, count: u64) {
        self.diagnostics.record_sample_underflow(count);
    }

    /// See [`Diagnostics::malformed_commands`].
    pub fn malformed_commands(&self) -> u64 {
        self.diagnostics.malformed_commands()
    }

    /// See [`Diagnostics::fault`].
    pub fn fault(&self) -> Option<ApplyError> {
        self.diagnostics.fault()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = self.stop_worker();
    }
}
