//! Progress-dependent batch size scheduling
//!
//! A schedule maps training-progress percentage thresholds to batch sizes:
//! `{0: 32, 50: 64}` trains the first half of every epoch at 32 and the
//! second half at 64. Thresholds are validated at configuration time;
//! a bad schedule never reaches the training loop.

use crate::error::{Error, Result};

/// One contiguous sample range trained at a single batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First sample offset of the range (inclusive).
    pub start: usize,
    /// End of the range (exclusive).
    pub end: usize,
    pub batch_size: usize,
}

/// Ordered mapping from progress-threshold percentage to batch size.
///
/// Immutable once built for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSizeSchedule {
    entries: Vec<(u8, usize)>,
}

impl BatchSizeSchedule {
    /// Build a schedule from `(threshold %, batch size)` pairs.
    ///
    /// Thresholds must be strictly ascending, within `0..=100`, and start
    /// at 0; batch sizes must be positive.
    pub fn new(entries: impl IntoIterator<Item = (u8, usize)>) -> Result<Self> {
        let entries: Vec<(u8, usize)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(Error::InvalidSchedule("schedule is empty".into()));
        }
        if entries[0].0 != 0 {
            return Err(Error::InvalidSchedule(format!(
                "first threshold must be 0, got {}",
                entries[0].0
            )));
        }
        for pair in entries.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(Error::InvalidSchedule(format!(
                    "thresholds must be strictly ascending ({} then {})",
                    pair[0].0, pair[1].0
                )));
            }
        }
        for &(threshold, size) in &entries {
            if threshold > 100 {
                return Err(Error::InvalidSchedule(format!(
                    "threshold {threshold} is outside 0..=100"
                )));
            }
            if size == 0 {
                return Err(Error::InvalidSchedule(format!(
                    "batch size at threshold {threshold} must be positive"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Fixed-size schedule: one segment covering the whole epoch.
    pub fn fixed(batch_size: usize) -> Result<Self> {
        Self::new([(0, batch_size)])
    }

    /// Multiply every batch size by the device count (at least 1).
    pub fn scaled_by_devices(mut self, device_count: usize) -> Self {
        let factor = device_count.max(1);
        for entry in &mut self.entries {
            entry.1 *= factor;
        }
        self
    }

    /// Batch size of the first segment; the evaluation fallback.
    pub fn base_size(&self) -> usize {
        self.entries[0].1
    }

    /// Derive the sample-range segments for a training set of `n` samples.
    ///
    /// Segment bounds are `tᵢ·n/100` with the last segment extending to
    /// `n`; consecutive segments share a boundary, so the ranges partition
    /// `[0, n)`.
    pub fn segments(&self, n: usize) -> Vec<Segment> {
        let mut out = Vec::with_capacity(self.entries.len());
        for (i, &(threshold, batch_size)) in self.entries.iter().enumerate() {
            let start = threshold as usize * n / 100;
            let end = match self.entries.get(i + 1) {
                Some(&(next, _)) => next as usize * n / 100,
                None => n,
            };
            out.push(Segment {
                start,
                end,
                batch_size,
            });
        }
        out
    }

    /// Segments remaining when resuming at sample offset `offset`.
    ///
    /// Segments whose end-bound ≤ `offset` are already consumed and
    /// dropped; the containing segment starts at exactly `offset`. No
    /// sample is replayed and no pending segment is skipped.
    pub fn segments_from(&self, n: usize, offset: usize) -> Vec<Segment> {
        self.segments(n)
            .into_iter()
            .filter(|seg| seg.end > offset)
            .map(|seg| Segment {
                start: seg.start.max(offset),
                ..seg
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_schedule_single_segment() {
        // N=100, {0: 10} => one segment, ten batches of ten
        let schedule = BatchSizeSchedule::fixed(10).unwrap();
        let segments = schedule.segments(100);
        assert_eq!(
            segments,
            vec![Segment {
                start: 0,
                end: 100,
                batch_size: 10
            }]
        );
    }

    #[test]
    fn test_segments_partition() {
        let schedule = BatchSizeSchedule::new([(0, 8), (30, 16), (75, 32)]).unwrap();
        let segments = schedule.segments(200);
        assert_eq!(segments[0], Segment { start: 0, end: 60, batch_size: 8 });
        assert_eq!(segments[1], Segment { start: 60, end: 150, batch_size: 16 });
        assert_eq!(segments[2], Segment { start: 150, end: 200, batch_size: 32 });
    }

    #[test]
    fn test_resume_skips_consumed_segments() {
        let schedule = BatchSizeSchedule::new([(0, 8), (30, 16), (75, 32)]).unwrap();

        // offset inside the second segment
        let segments = schedule.segments_from(200, 100);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], Segment { start: 100, end: 150, batch_size: 16 });
        assert_eq!(segments[1], Segment { start: 150, end: 200, batch_size: 32 });

        // offset exactly at a boundary: earlier segment fully consumed
        let segments = schedule.segments_from(200, 150);
        assert_eq!(segments, vec![Segment { start: 150, end: 200, batch_size: 32 }]);
    }

    #[test]
    fn test_device_scaling() {
        let schedule = BatchSizeSchedule::new([(0, 8), (50, 16)])
            .unwrap()
            .scaled_by_devices(4);
        assert_eq!(schedule.base_size(), 32);
        assert_eq!(schedule.segments(100)[1].batch_size, 64);

        // zero devices behaves as one
        let schedule = BatchSizeSchedule::fixed(8).unwrap().scaled_by_devices(0);
        assert_eq!(schedule.base_size(), 8);
    }

    #[test]
    fn test_validation_errors() {
        assert!(BatchSizeSchedule::new([]).is_err());
        assert!(BatchSizeSchedule::new([(10, 8)]).is_err()); // missing 0
        assert!(BatchSizeSchedule::new([(0, 8), (30, 16), (30, 32)]).is_err()); // not ascending
        assert!(BatchSizeSchedule::new([(0, 0)]).is_err()); // zero size
        assert!(BatchSizeSchedule::fixed(0).is_err());
    }
}
