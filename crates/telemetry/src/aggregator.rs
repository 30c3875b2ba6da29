//! Interval aggregator
//!
//! A lock-free counter that splits a stream of increments into contiguous,
//! non-overlapping windows. Producers call [`IntervalAggregator::add`] from
//! any thread; the scheduler calls [`IntervalAggregator::flush_and_reset`]
//! once per window.
//!
//! Every increment lands in exactly one window: the counter is drained with
//! a single atomic swap, so an `add` racing with a flush is counted either
//! in the window being closed or in the one that opens.
//!
//! ```text
//!   add(3) add(5)      flush       add(2)          flush
//!  ───┬──────┬───────────┼───────────┬───────────────┼────▶ t
//!     [ window #0: 8     ]           [ window #1: 2  ]
//! ```

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Monotonically increasing window identifier, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SequenceId(u64);

impl SequenceId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable result of closing one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSnapshot {
    count: u64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    sequence_id: SequenceId,
}

impl CountSnapshot {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

/// Lock-free windowed counter.
///
/// Share it as `Arc<IntervalAggregator>` between producers and the
/// reporting job.
#[derive(Debug)]
pub struct IntervalAggregator {
    count: AtomicU64,
    /// Start of the open window, epoch milliseconds
    window_start_ms: AtomicI64,
    next_sequence: AtomicU64,
}

impl Default for IntervalAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalAggregator {
    /// Create an aggregator whose first window opens now
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create an aggregator whose first window opens at `start`
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            count: AtomicU64::new(0),
            window_start_ms: AtomicI64::new(start.timestamp_millis()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Record `n` units of usage in the open window.
    ///
    /// Never blocks and never fails.
    #[inline]
    pub fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Units recorded in the open window so far
    pub fn pending(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// When the open window started
    pub fn window_start(&self) -> DateTime<Utc> {
        from_millis(self.window_start_ms.load(Ordering::Acquire))
    }

    /// Close the open window and start a new one.
    ///
    /// Called by a single scheduler task; concurrent `add` calls are safe.
    pub fn flush_and_reset(&self) -> CountSnapshot {
        self.flush_at(Utc::now())
    }

    /// Discard the open window and open a new one at `start`.
    ///
    /// Used when collection starts late, so the first reported window does
    /// not stretch back to construction. The sequence is not advanced.
    pub fn restart_window(&self, start: DateTime<Utc>) {
        let discarded = self.count.swap(0, Ordering::AcqRel);
        self.window_start_ms
            .store(start.timestamp_millis(), Ordering::Release);
        if discarded > 0 {
            debug!(discarded, "open window discarded");
        }
    }

    pub(crate) fn flush_at(&self, now: DateTime<Utc>) -> CountSnapshot {
        let count = self.count.swap(0, Ordering::AcqRel);

        let start_ms = self.window_start_ms.load(Ordering::Acquire);
        // Two flushes in the same millisecond still yield a non-empty window
        let end_ms = now.timestamp_millis().max(start_ms + 1);
        self.window_start_ms.store(end_ms, Ordering::Release);

        let sequence_id = SequenceId(self.next_sequence.fetch_add(1, Ordering::Relaxed));

        debug_assert!(end_ms > start_ms);
        CountSnapshot {
            count,
            window_start: from_millis(start_ms),
            window_end: from_millis(end_ms),
            sequence_id,
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
