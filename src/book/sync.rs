//! Update-sequence tracking between the REST snapshot and the diff stream.
//!
//! The tracker is the sole authority on whether an incoming diff is applied,
//! discarded, or forces a resync. Classification is a pure function of the
//! current state and the diff's update-id range; the book facade reports
//! back what actually happened so the watermark only moves on success.

use tracing::{debug, warn};

/// Lifecycle of the local book relative to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// No snapshot ingested yet.
    Uninitialized,
    /// Snapshot loaded, waiting for the first diff that satisfies the
    /// bootstrap predicate.
    Snapshotted,
    /// Snapshot plus a gap-free run of diffs.
    Live,
    /// Sequence lost or integrity violated; awaiting a fresh snapshot.
    Resync,
}

/// Why a diff was dropped without touching the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No snapshot has been ingested yet; diffs are dropped, not buffered.
    AwaitingSnapshot,
    /// The diff's final id is at or below the watermark.
    Stale,
    /// A resync is in progress; everything is dropped until the new
    /// snapshot arrives.
    ResyncInProgress,
}

/// Why the book must be rebuilt from a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// The diff's first id jumped past the watermark: events were lost.
    SequenceGap { expected: u64, actual: u64 },
    /// A delta batch failed validation before the merge.
    MalformedDiff,
    /// The merged book violated an integrity invariant.
    IntegrityViolation,
    /// The transport restarted; an unknown span of diffs was lost.
    ConnectionLost,
}

/// The verdict for one incoming diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Apply,
    Discard(DiscardReason),
    Resync(ResyncReason),
}

/// Tracks the update-id watermark and the book lifecycle state.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    state: BookState,
    snapshot_update_id: u64,
    last_update_id: u64,
    gap_warn: u64,
}

impl SyncTracker {
    pub fn new(gap_warn: u64) -> Self {
        Self {
            state: BookState::Uninitialized,
            snapshot_update_id: 0,
            last_update_id: 0,
            gap_warn,
        }
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    /// The largest final update id fully applied.
    pub fn watermark(&self) -> u64 {
        self.last_update_id
    }

    pub fn snapshot_update_id(&self) -> u64 {
        self.snapshot_update_id
    }

    /// Whether the book contents may be served to readers.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, BookState::Snapshotted | BookState::Live)
    }

    /// Classify a diff by its update-id range. Does not mutate anything;
    /// the caller reports the outcome via [`SyncTracker::on_applied`] or
    /// [`SyncTracker::on_resync`].
    ///
    /// In `Snapshotted` the watermark equals the snapshot id `S`, so the
    /// three arms below reduce to the bootstrap predicate: the first diff
    /// accepted after a snapshot satisfies `U <= S + 1 <= u`.
    pub fn classify(&self, first_update_id: u64, final_update_id: u64) -> SyncDecision {
        match self.state {
            BookState::Uninitialized => SyncDecision::Discard(DiscardReason::AwaitingSnapshot),
            BookState::Resync => SyncDecision::Discard(DiscardReason::ResyncInProgress),
            BookState::Snapshotted | BookState::Live => {
                if final_update_id <= self.last_update_id {
                    debug!(
                        first_update_id,
                        final_update_id,
                        watermark = self.last_update_id,
                        "discarding stale diff"
                    );
                    return SyncDecision::Discard(DiscardReason::Stale);
                }
                let expected = self.last_update_id + 1;
                if first_update_id > expected {
                    if first_update_id > self.last_update_id + self.gap_warn {
                        warn!(
                            first_update_id,
                            watermark = self.last_update_id,
                            gap = first_update_id - self.last_update_id,
                            "large gap in depth updates"
                        );
                    }
                    return SyncDecision::Resync(ResyncReason::SequenceGap {
                        expected,
                        actual: first_update_id,
                    });
                }
                // first_update_id <= watermark + 1 <= final_update_id:
                // a contiguous successor or a protocol-permitted overlap.
                SyncDecision::Apply
            }
        }
    }

    /// Record a freshly ingested snapshot with watermark `last_update_id`.
    pub fn on_snapshot(&mut self, last_update_id: u64) {
        self.snapshot_update_id = last_update_id;
        self.last_update_id = last_update_id;
        self.state = BookState::Snapshotted;
    }

    /// Record a successfully applied diff and advance the watermark.
    pub fn on_applied(&mut self, final_update_id: u64) {
        debug_assert!(final_update_id >= self.last_update_id);
        self.last_update_id = final_update_id;
        if self.state == BookState::Snapshotted {
            debug!(
                snapshot_update_id = self.snapshot_update_id,
                watermark = self.last_update_id,
                "bootstrap diff applied, book is live"
            );
            self.state = BookState::Live;
        }
    }

    /// Enter the resync state. Diffs are discarded until the next snapshot.
    pub fn on_resync(&mut self) {
        self.state = BookState::Resync;
    }

    /// Drop back to the initial state, e.g. after an invalid snapshot.
    pub fn reset(&mut self) {
        self.state = BookState::Uninitialized;
        self.snapshot_update_id = 0;
        self.last_update_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshotted(s: u64) -> SyncTracker {
        let mut tracker = SyncTracker::new(1000);
        tracker.on_snapshot(s);
        tracker
    }

    #[test]
    fn uninitialized_drops_everything() {
        let tracker = SyncTracker::new(1000);
        assert_eq!(
            tracker.classify(1, 2),
            SyncDecision::Discard(DiscardReason::AwaitingSnapshot)
        );
    }

    #[test]
    fn bootstrap_predicate() {
        // Snapshot watermark S = 500.
        let tracker = snapshotted(500);

        // u < S: stale.
        assert_eq!(
            tracker.classify(498, 499),
            SyncDecision::Discard(DiscardReason::Stale)
        );
        // u == S: still nothing new.
        assert_eq!(
            tracker.classify(499, 500),
            SyncDecision::Discard(DiscardReason::Stale)
        );
        // U <= S + 1 <= u: the bootstrap diff.
        assert_eq!(tracker.classify(499, 501), SyncDecision::Apply);
        assert_eq!(tracker.classify(501, 501), SyncDecision::Apply);
        // U > S + 1: gap before bootstrap.
        assert_eq!(
            tracker.classify(503, 510),
            SyncDecision::Resync(ResyncReason::SequenceGap {
                expected: 501,
                actual: 503
            })
        );
    }

    #[test]
    fn first_applied_diff_goes_live() {
        let mut tracker = snapshotted(100);
        assert_eq!(tracker.state(), BookState::Snapshotted);

        tracker.on_applied(105);
        assert_eq!(tracker.state(), BookState::Live);
        assert_eq!(tracker.watermark(), 105);
    }

    #[test]
    fn live_transitions() {
        let mut tracker = snapshotted(100);
        tracker.on_applied(105);

        // Already applied.
        assert_eq!(
            tracker.classify(90, 99),
            SyncDecision::Discard(DiscardReason::Stale)
        );
        assert_eq!(
            tracker.classify(105, 105),
            SyncDecision::Discard(DiscardReason::Stale)
        );
        // Contiguous successor.
        assert_eq!(tracker.classify(106, 110), SyncDecision::Apply);
        // Overlap is permitted by the protocol.
        assert_eq!(tracker.classify(100, 110), SyncDecision::Apply);
        // Gap.
        assert_eq!(
            tracker.classify(200, 210),
            SyncDecision::Resync(ResyncReason::SequenceGap {
                expected: 106,
                actual: 200
            })
        );
    }

    #[test]
    fn resync_drops_until_new_snapshot() {
        let mut tracker = snapshotted(100);
        tracker.on_resync();
        assert_eq!(tracker.state(), BookState::Resync);
        assert_eq!(
            tracker.classify(101, 102),
            SyncDecision::Discard(DiscardReason::ResyncInProgress)
        );

        tracker.on_snapshot(300);
        assert_eq!(tracker.state(), BookState::Snapshotted);
        assert_eq!(tracker.watermark(), 300);
        assert_eq!(tracker.classify(299, 301), SyncDecision::Apply);
    }

    #[test]
    fn watermark_never_decreases_on_apply() {
        let mut tracker = snapshotted(100);
        tracker.on_applied(105);
        tracker.on_applied(110);
        assert_eq!(tracker.watermark(), 110);
    }
}
