//! Local order book: snapshot + diff reconciliation core.
//!
//! The book is owned by a single driver and never blocks. Incoming diffs
//! are classified against the update-id watermark, merged one side at a
//! time, and validated; any failure mode either discards the event or
//! drives the book into resync — nothing here panics or propagates errors
//! as control flow, except an invalid snapshot which is reported back to
//! the caller.

pub mod side;
pub mod sync;
pub mod validate;

use std::time::Instant;

use tracing::{debug, warn};

pub use side::{Ladder, MalformedBatch, PriceLevel, Side};
pub use sync::{BookState, DiscardReason, ResyncReason, SyncDecision, SyncTracker};
pub use validate::IntegrityViolation;

/// Default bound on the number of levels kept per side.
pub const MAX_DEPTH: usize = 5000;

/// Default update-id gap above which a warning is logged before resync.
pub const GAP_WARN: u64 = 1000;

/// Tuning knobs recognized by the core.
#[derive(Debug, Clone)]
pub struct BookConfig {
    pub max_depth: usize,
    pub gap_warn: u64,
    pub repair_crossed: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            gap_warn: GAP_WARN,
            repair_crossed: true,
        }
    }
}

/// A point-in-time dump of both sides, parsed to finite numbers at the
/// wire boundary.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// An incremental depth update covering update ids
/// `first_update_id..=final_update_id`.
#[derive(Debug, Clone)]
pub struct DepthDiff {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// What happened to one diff handed to [`OrderBook::apply_diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The diff was merged and the watermark advanced.
    Applied,
    /// The diff was dropped without touching the book.
    Discarded(DiscardReason),
    /// The book entered resync; the caller must fetch a fresh snapshot.
    ResyncNeeded(ResyncReason),
}

/// The snapshot could not seed the book.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is empty after filtering invalid levels")]
    Empty,
    #[error("snapshot is crossed: best bid {best_bid} >= best ask {best_ask}")]
    Crossed { best_bid: f64, best_ask: f64 },
}

/// Event counters kept for observability. Never consulted for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookCounters {
    pub applied: u64,
    pub stale_events: u64,
    pub dropped_unready: u64,
    pub malformed_batches: u64,
    pub sequence_gaps: u64,
    pub integrity_violations: u64,
    pub cross_repairs: u64,
    pub resyncs: u64,
}

/// Two-sided limit order book for a single trading pair.
pub struct OrderBook {
    bids: Ladder,
    asks: Ladder,
    tracker: SyncTracker,
    repair_crossed: bool,
    counters: BookCounters,
    last_apply_at: Option<Instant>,
}

impl OrderBook {
    pub fn new(config: BookConfig) -> Self {
        Self {
            bids: Ladder::new(Side::Bid, config.max_depth),
            asks: Ladder::new(Side::Ask, config.max_depth),
            tracker: SyncTracker::new(config.gap_warn),
            repair_crossed: config.repair_crossed,
            counters: BookCounters::default(),
            last_apply_at: None,
        }
    }

    /// Replace both sides with the snapshot's levels and reset the
    /// watermark to the snapshot's update id.
    ///
    /// Invalid levels are filtered first; the snapshot is rejected only if
    /// nothing remains on either side afterwards, or if it is crossed. On
    /// rejection the book is cleared and reverts to `Uninitialized`.
    pub fn apply_snapshot(&mut self, snapshot: BookSnapshot) -> Result<(), SnapshotError> {
        self.bids.load(snapshot.bids);
        self.asks.load(snapshot.asks);

        if self.bids.is_empty() && self.asks.is_empty() {
            self.reject_snapshot();
            return Err(SnapshotError::Empty);
        }
        if let (Some(bid), Some(ask)) = (self.bids.best(), self.asks.best()) {
            if bid.price >= ask.price {
                let err = SnapshotError::Crossed {
                    best_bid: bid.price,
                    best_ask: ask.price,
                };
                self.reject_snapshot();
                return Err(err);
            }
        }

        self.tracker.on_snapshot(snapshot.last_update_id);
        debug!(
            last_update_id = snapshot.last_update_id,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "snapshot ingested"
        );
        Ok(())
    }

    /// Merge one depth diff. The event either fully applies to both sides
    /// or leaves no observable trace: a discard touches nothing, and a
    /// failure clears the book and enters resync, where all queries return
    /// unavailable until the next snapshot.
    pub fn apply_diff(&mut self, diff: &DepthDiff) -> ApplyOutcome {
        if diff.final_update_id < diff.first_update_id {
            warn!(
                first_update_id = diff.first_update_id,
                final_update_id = diff.final_update_id,
                "diff carries an inverted update-id range"
            );
            return self.enter_resync(ResyncReason::MalformedDiff);
        }

        match self
            .tracker
            .classify(diff.first_update_id, diff.final_update_id)
        {
            SyncDecision::Discard(reason) => {
                match reason {
                    DiscardReason::Stale => self.counters.stale_events += 1,
                    _ => self.counters.dropped_unready += 1,
                }
                ApplyOutcome::Discarded(reason)
            }
            SyncDecision::Resync(reason) => self.enter_resync(reason),
            SyncDecision::Apply => self.merge_and_validate(diff),
        }
    }

    fn merge_and_validate(&mut self, diff: &DepthDiff) -> ApplyOutcome {
        if let Err(err) = self.bids.apply(&diff.bids) {
            warn!(%err, "rejecting diff with malformed bid batch");
            return self.enter_resync(ResyncReason::MalformedDiff);
        }
        if let Err(err) = self.asks.apply(&diff.asks) {
            warn!(%err, "rejecting diff with malformed ask batch");
            return self.enter_resync(ResyncReason::MalformedDiff);
        }

        match validate::validate_book(&mut self.bids, &mut self.asks, self.repair_crossed) {
            Ok(removed) => {
                if removed > 0 {
                    self.counters.cross_repairs += 1;
                }
            }
            Err(violation) => {
                warn!(%violation, "post-apply integrity check failed");
                return self.enter_resync(ResyncReason::IntegrityViolation);
            }
        }

        self.tracker.on_applied(diff.final_update_id);
        self.counters.applied += 1;
        self.last_apply_at = Some(Instant::now());
        ApplyOutcome::Applied
    }

    /// Force the book into resync. Used by the driver when an event is
    /// lost outside the core (undecodable frame, transport restart): the
    /// missing ids would surface as a gap anyway, so the book goes straight
    /// to awaiting a snapshot.
    pub fn force_resync(&mut self, reason: ResyncReason) -> ApplyOutcome {
        self.enter_resync(reason)
    }

    fn enter_resync(&mut self, reason: ResyncReason) -> ApplyOutcome {
        match reason {
            ResyncReason::SequenceGap { .. } => self.counters.sequence_gaps += 1,
            ResyncReason::MalformedDiff => self.counters.malformed_batches += 1,
            ResyncReason::IntegrityViolation => self.counters.integrity_violations += 1,
            ResyncReason::ConnectionLost => {}
        }
        self.counters.resyncs += 1;
        // Clear both sides so no partially merged state survives; queries
        // report unavailable until the next snapshot lands.
        self.bids.clear();
        self.asks.clear();
        self.tracker.on_resync();
        warn!(?reason, watermark = self.tracker.watermark(), "book entering resync");
        ApplyOutcome::ResyncNeeded(reason)
    }

    fn reject_snapshot(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.tracker.reset();
    }

    pub fn state(&self) -> BookState {
        self.tracker.state()
    }

    /// The largest update id fully applied.
    pub fn watermark(&self) -> u64 {
        self.tracker.watermark()
    }

    pub fn counters(&self) -> BookCounters {
        self.counters
    }

    /// Milliseconds since the last successful diff application, on the
    /// monotonic clock.
    pub fn last_apply_age_ms(&self) -> Option<u64> {
        self.last_apply_at
            .map(|at| at.elapsed().as_millis() as u64)
    }

    /// Best bid, or `None` when the side is empty or the book is not
    /// serving (uninitialized or resyncing).
    pub fn best_bid(&self) -> Option<PriceLevel> {
        if !self.tracker.is_ready() {
            return None;
        }
        self.bids.best().copied()
    }

    /// Best ask, under the same availability rule as [`OrderBook::best_bid`].
    pub fn best_ask(&self) -> Option<PriceLevel> {
        if !self.tracker.is_ready() {
            return None;
        }
        self.asks.best().copied()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn bids(&self) -> &Ladder {
        &self.bids
    }

    pub fn asks(&self) -> &Ladder {
        &self.asks
    }

    /// Copy of the top `n` levels per side, for readers outside the owning
    /// task. Empty when the book is not serving.
    pub fn top_levels(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        if !self.tracker.is_ready() {
            return (Vec::new(), Vec::new());
        }
        (
            self.bids.iter().take(n).copied().collect(),
            self.asks.iter().take(n).copied().collect(),
        )
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new(BookConfig::default())
    }
}
