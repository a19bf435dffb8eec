//! Health counters polled by the control side.
//!
//! Nothing here is fatal. The generation side bumps counters and carries on;
//! the control side decides what persistent underflow or a malformed command
//! means for the experiment.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::ApplyError;

/// Shared diagnostic counters. All accesses are relaxed.
#[derive(Debug, Default)]
pub struct Diagnostics {
    command_underflow: AtomicU64,
    sample_underflow: AtomicU64,
    malformed: AtomicU64,
    fault: AtomicU32,
    strict: bool,
}

impl Diagnostics {
    /// Creates zeroed counters. In strict mode the first apply error is
    /// latched into [`fault`](Self::fault).
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    /// Steps that had to catch up on stale commands.
    pub fn command_underflow(&self) -> u64 {
        self.command_underflow.load(Ordering::Relaxed)
    }

    /// Underflows reported by the sample consumer.
    pub fn sample_underflow(&self) -> u64 {
        self.sample_underflow.load(Ordering::Relaxed)
    }

    /// Records `count` sample underflows seen by the consumer.
    pub fn record_sample_underflow(&self, count: u64) {
        self.sample_underflow.fetch_add(count, Ordering::Relaxed);
    }

    /// Commands rejected by the apply step.
    pub fn malformed_commands(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// First apply error seen in strict mode.
    pub fn fault(&self) -> Option<ApplyError> {
        ApplyError::from_code(self.fault.load(Ordering::Relaxed))
    }

    pub(crate) fn record_command_underflow(&self) {
        self.command_underflow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_apply_error(&self, err: ApplyError) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        if self.strict {
            let _ = self
                .fault
                .compare_exchange(0, err.code(), Ordering::Relaxed, Ordering::Relaxed);
        }
    }

    /// Zeroes both underflow counters.
    pub(crate) fn clear_underflow(&self) {
        self.command_underflow.store(0, Ordering::Relaxed);
        self.sample_underflow.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_mode_counts_without_fault() {
        let diag = Diagnostics::new(false);
        diag.record_apply_error(ApplyError::ChannelOutOfRange);
        assert_eq!(diag.malformed_commands(), 1);
        assert_eq!(diag.fault(), None);
    }

    #[test]
    fn strict_mode_latches_first_error() {
        let diag = Diagnostics::new(true);
        diag.record_apply_error(ApplyError::ChannelTableFull);
        diag.record_apply_error(ApplyError::ChannelOutOfRange);
        assert_eq!(diag.malformed_commands(), 2);
        assert_eq!(diag.fault(), Some(ApplyError::ChannelTableFull));
    }

    #[test]
    fn clear_underflow_keeps_malformed() {
        let diag = Diagnostics::new(false);
        diag.record_command_underflow();
        diag.record_sample_underflow(3);
        diag.record_apply_error(ApplyError::ChannelOutOfRange);
        diag.clear_underflow();
        assert_eq!(diag.command_underflow(), 0);
        assert_eq!(diag.sample_underflow(), 0);
        assert_eq!(diag.malformed_commands(), 1);
    }
}
