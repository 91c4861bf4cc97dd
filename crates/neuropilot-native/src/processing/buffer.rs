//! Fixed-capacity ring buffer of conditioned frames
//!
//! Samples are stored in one flat allocation (`capacity × channels`) so
//! that ingestion never allocates. Readers never see the live storage; they
//! receive a [`WindowSnapshot`] copied out in chronological order.

/// Ring buffer of filtered multi-channel samples
#[derive(Clone, Debug)]
pub struct ConditionedBuffer {
    channels: usize,
    capacity: usize,
    /// Row-major samples, one row of `channels` values per slot
    data: Vec<f64>,
    timestamps: Vec<u64>,
    /// Next slot to write
    head: usize,
    len: usize,
}

impl ConditionedBuffer {
    /// Create an empty buffer holding at most `capacity` frames.
    #[must_use]
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels,
            capacity,
            data: vec![0.0; capacity * channels],
            timestamps: vec![0; capacity],
            head: 0,
            len: 0,
        }
    }

    /// Channels per frame
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Maximum number of frames
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no frames are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a frame, evicting the oldest when full.
    ///
    /// `samples` must contain exactly `channels()` values.
    pub fn push(&mut self, timestamp_us: u64, samples: &[f64]) {
        debug_assert_eq!(samples.len(), self.channels);
        if self.capacity == 0 {
            return;
        }

        let start = self.head * self.channels;
        self.data[start..start + self.channels].copy_from_slice(samples);
        self.timestamps[self.head] = timestamp_us;

        self.head = (self.head + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    /// Copy out the most recent `min(len, n)` frames, oldest first.
    #[must_use]
    pub fn snapshot(&self, n: usize) -> WindowSnapshot {
        let count = n.min(self.len);
        let mut samples = Vec::with_capacity(count * self.channels);
        let mut timestamps = Vec::with_capacity(count);

        let oldest = (self.head + self.capacity - count) % self.capacity.max(1);
        for i in 0..count {
            let slot = (oldest + i) % self.capacity;
            let start = slot * self.channels;
            samples.extend_from_slice(&self.data[start..start + self.channels]);
            timestamps.push(self.timestamps[slot]);
        }

        WindowSnapshot { channels: self.channels, samples, timestamps }
    }

    /// Drop all buffered frames
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Owned copy of the most recent conditioned frames
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowSnapshot {
    channels: usize,
    /// Row-major, `len() × channels` values
    samples: Vec<f64>,
    timestamps: Vec<u64>,
}

impl WindowSnapshot {
    /// Build a snapshot from row-major samples.
    ///
    /// Used by benchmarks and tests that bypass the conditioner.
    #[must_use]
    pub fn from_rows(channels: usize, timestamps: Vec<u64>, samples: Vec<f64>) -> Self {
        debug_assert_eq!(samples.len(), timestamps.len() * channels);
        Self { channels, samples, timestamps }
    }

    /// Channels per frame
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the snapshot holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Frame `index` (0 = oldest)
    #[must_use]
    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// All samples, row-major
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Timestamp of the newest frame
    #[must_use]
    pub fn end_timestamp(&self) -> Option<u64> {
        self.timestamps.last().copied()
    }

    /// Frame timestamps, oldest first
    #[must_use]
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut buf = ConditionedBuffer::new(2, 5);
        for i in 0..23u64 {
            buf.push(i, &[i as f64, -(i as f64)]);
            assert!(buf.len() <= buf.capacity());
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.snapshot(1).end_timestamp(), Some(22));
    }

    #[test]
    fn test_snapshot_chronological_after_wrap() {
        let mut buf = ConditionedBuffer::new(2, 4);
        for i in 0..7u64 {
            buf.push(i * 10, &[i as f64, 100.0 + i as f64]);
        }

        let snap = buf.snapshot(3);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.timestamps(), &[40, 50, 60]);
        assert_eq!(snap.row(0), &[4.0, 104.0]);
        assert_eq!(snap.row(2), &[6.0, 106.0]);

        // Requesting more than buffered returns what exists
        let all = buf.snapshot(100);
        assert_eq!(all.timestamps(), &[30, 40, 50, 60]);
    }

    #[test]
    fn test_snapshot_partial_fill() {
        let mut buf = ConditionedBuffer::new(1, 8);
        buf.push(1, &[1.0]);
        buf.push(2, &[2.0]);

        let snap = buf.snapshot(8);
        assert_eq!(snap.samples(), &[1.0, 2.0]);
        assert_eq!(snap.end_timestamp(), Some(2));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut buf = ConditionedBuffer::new(1, 3);
        buf.push(1, &[1.0]);
        let snap = buf.snapshot(3);
        buf.push(2, &[2.0]);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut buf = ConditionedBuffer::new(3, 4);
        buf.push(1, &[1.0, 2.0, 3.0]);
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.snapshot(4).is_empty());
        assert_eq!(buf.snapshot(4).end_timestamp(), None);
    }
}
