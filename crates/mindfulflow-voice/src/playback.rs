//! Gapless playback scheduling.
//!
//! Every chunk starts at `max(now, cursor)` and moves the cursor to its own
//! end, so chunks play back-to-back in arrival order without overlapping.
//! Scheduled sources live in an arena keyed by monotonically increasing
//! [`SourceId`]s until the output reports them finished, they are pruned
//! after their end time, or the session stops.

use std::collections::BTreeMap;

/// Handle of one scheduled playback source. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start on the output clock, in seconds.
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    next_id: u64,
    active: BTreeMap<SourceId, ScheduledSource>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free start time on the output clock.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn get(&self, id: SourceId) -> Option<&ScheduledSource> {
        self.active.get(&id)
    }

    /// Places a chunk of `duration` seconds on the timeline.
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledSource {
        let start = now.max(self.cursor);
        let end = start + duration.max(0.0);
        self.cursor = end;

        let id = SourceId(self.next_id);
        self.next_id += 1;

        let source = ScheduledSource { id, start, end };
        self.active.insert(id, source);
        source
    }

    /// Forgets a finished source. Unknown ids are ignored.
    pub fn complete(&mut self, id: SourceId) -> Option<ScheduledSource> {
        self.active.remove(&id)
    }

    /// Drops sources whose end time is not after `now`.
    pub fn prune(&mut self, now: f64) -> usize {
        let before = self.active.len();
        self.active.retain(|_, s| s.end > now);
        before - self.active.len()
    }

    /// Clears the arena and rewinds the cursor to zero.
    ///
    /// Returns the ids that were still queued or playing so the caller can
    /// force-stop them.
    pub fn stop_all(&mut self) -> Vec<SourceId> {
        let ids = self.active.keys().copied().collect();
        self.active.clear();
        self.cursor = 0.0;
        ids
    }
}
