/// `scripting/quota.rs` — per-run outbound message budget
///
/// The budget degrades in three phases: deliver while positive, one notice at
/// zero, silence afterwards. The counter keeps decreasing once muted.

use std::sync::atomic::{AtomicI64, Ordering};

/// Messages a script may send per run.
pub const DEFAULT_MESSAGE_QUOTA: i64 = 10;

pub const QUOTA_EXCEEDED: &str = "message quota exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Deliver,
    /// Budget just ran out; send the one-off notice instead.
    Notice,
    Muted,
}

#[derive(Debug)]
pub struct OutputQuota {
    remaining: AtomicI64,
}

impl OutputQuota {
    pub fn new(budget: i64) -> Self {
        Self {
            remaining: AtomicI64::new(budget),
        }
    }

    /// Charge one message. Returns the phase and the counter after the charge.
    pub fn admit(&self) -> (Admission, i64) {
        let before = self.remaining.fetch_sub(1, Ordering::SeqCst);
        let admission = match before {
            n if n > 0 => Admission::Deliver,
            0 => Admission::Notice,
            _ => Admission::Muted,
        };
        (admission, before - 1)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl Default for OutputQuota {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_QUOTA)
    }
}
