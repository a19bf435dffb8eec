//! Start/end trigger handshake shared by the control and generation sides.
//!
//! [`TriggerContext`] is the only state both threads write outside the two
//! rings. Each field documents its memory ordering. Only the start-trigger id
//! needs an acquire/release pair: the trigger time published alongside it must
//! be visible once the id is. Everything else is advisory and tolerates a few
//! steps of latency, so it is relaxed.
//!
//! ## Start trigger
//!
//! The control side allocates an id, issues a `TriggerStart` command carrying
//! it, and later calls [`TriggerContext::publish_start_trigger`] with the
//! global time at which output should go live. The engine holds output until
//! the published id reaches the command's id and the projected global time
//! reaches the published time.
//!
//! ## End trigger
//!
//! A `TriggerEnd` command marks an id pending. The engine promotes it to
//! waiting and stamps the current output sample position. Once the consumer
//! releases samples past that position the stamp clears, and the engine
//! publishes the id as triggered.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

const NO_POSITION: u64 = u64::MAX;

/// Cross-thread trigger state.
#[derive(Debug)]
pub struct TriggerContext {
    /// Highest published start id. Control side stores with `Release` after
    /// `start_time`; the engine loads with `Acquire`.
    start_id: AtomicU32,
    /// Global time paired with `start_id`. Relaxed, ordered by `start_id`.
    start_time: AtomicU64,
    /// Offset added to the engine's projected global time. Relaxed.
    time_offset: AtomicI64,
    /// Set while a start trigger is unmet. Written by the engine, relaxed.
    slow_mode: AtomicBool,
    /// Last end id that fired. Written by the engine, relaxed.
    end_triggered: AtomicU32,
    /// Output sample position of the waiting end trigger, `NO_POSITION` when
    /// none. Set by the engine, cleared by the consumer. Relaxed.
    end_position: AtomicU64,
    /// Control-side id allocators. Relaxed.
    next_start_id: AtomicU32,
    next_end_id: AtomicU32,
}

impl Default for TriggerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerContext {
    /// Creates a context with no published triggers.
    pub fn new() -> Self {
        Self {
            start_id: AtomicU32::new(0),
            start_time: AtomicU64::new(0),
            time_offset: AtomicI64::new(0),
            slow_mode: AtomicBool::new(false),
            end_triggered: AtomicU32::new(0),
            end_position: AtomicU64::new(NO_POSITION),
            next_start_id: AtomicU32::new(0),
            next_end_id: AtomicU32::new(0),
        }
    }

    /// Returns a fresh start-trigger id (ids start at 1).
    pub fn allocate_start_trigger_id(&self) -> u32 {
        self.next_start_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns a fresh end-trigger id (ids start at 1).
    pub fn allocate_end_trigger_id(&self) -> u32 {
        self.next_end_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Publishes start trigger `id`, going live at `global_time`.
    pub fn publish_start_trigger(&self, id: u32, global_time: u64) {
        self.start_time.store(global_time, Ordering::Relaxed);
        self.start_id.store(id, Ordering::Release);
    }

    /// Whether the engine is holding output for an unmet start trigger.
    pub fn is_in_slow_mode(&self) -> bool {
        self.slow_mode.load(Ordering::Relaxed)
    }

    /// Last end-trigger id that fired, 0 if none.
    pub fn triggered_end_id(&self) -> u32 {
        self.end_triggered.load(Ordering::Relaxed)
    }

    /// Sets the offset added to the engine's projected global time.
    pub fn set_time_offset(&self, offset: i64) {
        self.time_offset.store(offset, Ordering::Relaxed);
    }

    /// Current global time offset.
    pub fn time_offset(&self) -> i64 {
        self.time_offset.load(Ordering::Relaxed)
    }

    /// Output sample position the waiting end trigger is bound to.
    pub fn end_trigger_position(&self) -> Option<u64> {
        match self.end_position.load(Ordering::Relaxed) {
            NO_POSITION => None,
            pos => Some(pos),
        }
    }

    /// Whether start trigger `id` is satisfied at `elapsed` global time units.
    pub(crate) fn start_reached(&self, id: u32, elapsed: u64) -> bool {
        if self.start_id.load(Ordering::Acquire) < id {
            return false;
        }
        let trigger_time = self.start_time.load(Ordering::Relaxed);
        self.time_offset() as i128 + elapsed as i128 >= trigger_time as i128
    }

    pub(crate) fn set_slow_mode(&self, slow: bool) {
        self.slow_mode.store(slow, Ordering::Relaxed);
    }

    pub(crate) fn set_end_position(&self, position: u64) {
        self.end_position.store(position, Ordering::Relaxed);
    }

    pub(crate) fn set_end_triggered(&self, id: u32) {
        self.end_triggered.store(id, Ordering::Relaxed);
    }

    /// Called by the consumer after releasing samples up to `released`
    /// (exclusive). Clears the end position once it has been passed.
    pub(crate) fn release_through(&self, released: u64) {
        let pos = self.end_position.load(Ordering::Relaxed);
        if pos != NO_POSITION && released > pos {
            // A newer stamp from the engine wins.
            let _ = self.end_position.compare_exchange(
                pos,
                NO_POSITION,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }
}

/// Generation-side end-trigger state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndTrigger {
    pending: u32,
    waiting: u32,
}

impl EndTrigger {
    /// Records end id `id` as pending, replacing an earlier pending id.
    #[inline]
    pub fn arm(&mut self, id: u32) {
        self.pending = id;
    }

    /// Pending id, 0 if none.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Waiting id, 0 if none.
    #[inline]
    pub fn waiting(&self) -> u32 {
        self.waiting
    }

    /// Runs once per step. `position` is the output sample position of the
    /// step being generated.
    pub fn poll(&mut self, ctx: &TriggerContext, position: u64) {
        if self.waiting != 0 {
            if ctx.end_trigger_position().is_none() {
                ctx.set_end_triggered(self.waiting);
                #[cfg(feature = "tracing")]
                tracing::debug!("trigger: end id {} fired", self.waiting);
                self.waiting = self.pending;
                self.pending = 0;
                if self.waiting != 0 {
                    ctx.set_end_position(position);
                }
            }
        } else if self.pending != 0 {
            self.waiting = self.pending;
            self.pending = 0;
            ctx.set_end_position(position);
        }
    }
}
