//! Bounded, time-ordered history of live pitch readings.

/// One live reading attributed to a playback position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    pub timestamp_ms: u64,
    pub frequency: f32,
}

/// Recent `(timestamp, frequency)` readings for the renderer's trail.
///
/// Entries are only appended at the tail and removed as a prefix, so they
/// stay in timestamp order. Pruning bounds the history to a retention window
/// behind the current playback position.
#[derive(Debug, Clone)]
pub struct PitchHistory {
    entries: Vec<PitchSample>,
    retention_ms: u64,
}

impl PitchHistory {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            entries: Vec::new(),
            retention_ms,
        }
    }

    /// Appends a reading.
    ///
    /// A timestamp earlier than the tail means playback jumped backwards;
    /// the old trail no longer lines up with the song and is discarded.
    pub fn push(&mut self, timestamp_ms: u64, frequency: f32) {
        if self
            .entries
            .last()
            .is_some_and(|last| timestamp_ms < last.timestamp_ms)
        {
            log::debug!("Playback moved back to {timestamp_ms} ms, clearing pitch history");
            self.entries.clear();
        }
        self.entries.push(PitchSample {
            timestamp_ms,
            frequency,
        });
    }

    /// Drops every entry older than `current_ms - retention`.
    ///
    /// Does nothing while the window still reaches back past zero. If every
    /// entry is older than the cut-off the history is left as is; the next
    /// append brings a current entry in.
    pub fn prune(&mut self, current_ms: u64) {
        let Some(min_ms) = current_ms.checked_sub(self.retention_ms).filter(|&m| m > 0) else {
            return;
        };

        let cut = self.entries.partition_point(|s| s.timestamp_ms < min_ms);
        if cut > 0 && cut < self.entries.len() {
            self.entries.drain(..cut);
        }
    }

    /// Copies the readings with `from_ms <= timestamp <= to_ms`.
    pub fn window(&self, from_ms: u64, to_ms: u64) -> Vec<PitchSample> {
        let start = self.entries.partition_point(|s| s.timestamp_ms < from_ms);
        let end = self.entries.partition_point(|s| s.timestamp_ms <= to_ms);
        self.entries[start..end.max(start)].to_vec()
    }

    pub fn entries(&self) -> &[PitchSample] {
        &self.entries
    }

    pub fn last(&self) -> Option<&PitchSample> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }
}

impl Default for PitchHistory {
    fn default() -> Self {
        Self::new(30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(h: &PitchHistory) -> Vec<u64> {
        h.entries().iter().map(|s| s.timestamp_ms).collect()
    }

    #[test]
    fn keeps_only_retention_window() {
        let mut h = PitchHistory::new(30_000);
        for ts in (0..=40_000).step_by(1000) {
            h.push(ts, 220.0);
            h.prune(ts);
        }
        let ts = timestamps(&h);
        assert!(!ts.is_empty());
        assert_eq!(ts.first(), Some(&10_000));
        assert_eq!(ts.last(), Some(&40_000));
        assert!(ts.iter().all(|&t| t >= 40_000 - 30_000));
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn no_pruning_inside_first_window() {
        let mut h = PitchHistory::new(30_000);
        for ts in (0..=30_000).step_by(5000) {
            h.push(ts, 100.0);
            h.prune(ts);
        }
        assert_eq!(h.len(), 7);
    }

    #[test]
    fn all_stale_entries_are_kept_until_next_append() {
        let mut h = PitchHistory::new(1000);
        h.push(100, 1.0);
        h.push(200, 1.0);
        h.prune(10_000);
        assert_eq!(h.len(), 2);
        h.push(10_000, 1.0);
        h.prune(10_000);
        assert_eq!(timestamps(&h), vec![10_000]);
    }

    #[test]
    fn backwards_seek_clears_trail() {
        let mut h = PitchHistory::new(30_000);
        h.push(5000, 200.0);
        h.push(6000, 210.0);
        h.push(1000, 220.0);
        assert_eq!(timestamps(&h), vec![1000]);
    }

    #[test]
    fn equal_timestamps_are_kept_in_order() {
        let mut h = PitchHistory::new(30_000);
        h.push(1000, 200.0);
        h.push(1000, 201.0);
        assert_eq!(h.len(), 2);
        assert_eq!(h.last().map(|s| s.frequency), Some(201.0));
    }

    #[test]
    fn window_is_inclusive() {
        let mut h = PitchHistory::new(30_000);
        for ts in [100, 200, 300, 400] {
            h.push(ts, ts as f32);
        }
        let w: Vec<u64> = h.window(200, 300).iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(w, vec![200, 300]);
        assert!(h.window(500, 600).is_empty());
        assert!(h.window(300, 100).is_empty());
    }
}
