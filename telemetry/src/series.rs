use chrono::{
    DateTime,
    Timelike as _,
    Utc,
};
use std::collections::VecDeque;

/// Capacity of one shard series. The backend seeds up to a day of
/// per-minute samples; anything older than the most recent 1000 points is
/// dropped at seed time and evicted at runtime.
pub const SERIES_CAPACITY: usize = 1000;

/// Fixed-capacity, append-only time series of `(timestamp, value)` samples.
///
/// Oldest samples are evicted on overflow, so a poll session can run
/// indefinitely without growing the series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleSeries {
    samples: VecDeque<(DateTime<Utc>, u64)>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a series from snapshot history. `step` is the sampling cadence
    /// of the source series; seeded timestamps are back-dated from `now` at
    /// that cadence, the way the initial chart seed behaves.
    pub fn seed(now: DateTime<Utc>, values: &[u64], step: chrono::Duration) -> Self {
        let skip = values.len().saturating_sub(SERIES_CAPACITY);
        let values = &values[skip..];
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| (now - step * (values.len() - i) as i32, *v))
            .collect();
        Self { samples }
    }

    pub fn push(&mut self, at: DateTime<Utc>, value: u64) {
        if self.samples.len() == SERIES_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back((at, value));
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, u64)> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, u64)> + '_ {
        self.samples.iter().copied()
    }
}

/// Tracks wall-clock minute boundaries for the per-minute series.
///
/// Polls arrive every second; the per-minute series receives one point per
/// minute, aligned to the minute the poll timestamp falls into rather than
/// to tick counts.
#[derive(Clone, Debug, Default)]
pub struct MinuteGate {
    last_minute: Option<i64>,
}

impl MinuteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true at most once per wall-clock minute.
    pub fn admit(&mut self, at: DateTime<Utc>) -> bool {
        let minute = at.timestamp() - i64::from(at.second());
        if self.last_minute == Some(minute) {
            return false;
        }
        self.last_minute = Some(minute);
        true
    }
}
