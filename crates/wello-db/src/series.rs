//! A single append-only, time-ordered log.
//!
//! Records are kept sorted by timestamp; records sharing a timestamp keep
//! their append order. Appending in timestamp order is an amortized O(1)
//! push. A late record is inserted at its ordered position so that
//! [`TimeSeriesLog::last`] always returns the newest timestamp.
//!
//! Reads never block on each other. [`TimeSeriesLog::all`] copies the log
//! under the read lock and therefore returns a consistent snapshot: every
//! append that completed before the call is included, none that started
//! after it is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use wello_types::{ActuatorStateRecord, Reading};

/// A record that can live in a [`TimeSeriesLog`].
pub trait Timestamped: Clone {
    /// Instant the record refers to.
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for Reading {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for ActuatorStateRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered in-memory log of one metric or one output.
#[derive(Debug)]
pub struct TimeSeriesLog<R> {
    name: &'static str,
    records: RwLock<Vec<R>>,
    write_failed: AtomicBool,
}

impl<R: Timestamped> TimeSeriesLog<R> {
    /// Create an empty log.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            records: RwLock::new(Vec::new()),
            write_failed: AtomicBool::new(false),
        }
    }

    /// Name of the log, as used in the journal.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Option<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Most recent record satisfying `predicate`, if any.
    pub fn last_matching<P>(&self, predicate: P) -> Option<R>
    where
        P: Fn(&R) -> bool,
    {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|record| predicate(record))
            .cloned()
    }

    /// Snapshot of every record, oldest first.
    ///
    /// The returned vector is owned by the caller and can be iterated any
    /// number of times.
    pub fn all(&self) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the log holds no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a journal write failure has closed this log to appends.
    pub fn is_write_failed(&self) -> bool {
        self.write_failed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_write_failed(&self) {
        self.write_failed.store(true, Ordering::Release);
    }

    /// Make `record` visible to readers.
    pub(crate) fn insert(&self, record: R) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let at = record.timestamp();
        let position = records.partition_point(|existing| existing.timestamp() <= at);
        records.insert(position, record);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chrono::TimeDelta;
    use wello_types::{MetricKind, OutputKind};

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn empty_log_has_no_last() {
        let log: TimeSeriesLog<Reading> = TimeSeriesLog::new("flow_in");
        assert!(log.last().is_none());
        assert!(log.last_matching(|_| true).is_none());
        assert!(log.is_empty());
        assert!(log.all().is_empty());
    }

    #[test]
    fn last_matching_skips_newer_non_matching_records() {
        let log = TimeSeriesLog::new("pump_in");
        log.insert(ActuatorStateRecord::new(OutputKind::PumpIn, false, at(0)));
        log.insert(ActuatorStateRecord::new(OutputKind::PumpIn, true, at(10)));
        log.insert(ActuatorStateRecord::new(OutputKind::PumpIn, true, at(20)));

        let stop = log.last_matching(|r| !r.running).unwrap();
        assert_eq!(stop.timestamp, at(0));
        assert!(log.last().unwrap().running);
        assert!(log.last_matching(|r| r.timestamp > at(30)).is_none());
    }

    #[test]
    fn late_record_is_inserted_in_order() {
        let log = TimeSeriesLog::new("volume");
        log.insert(Reading::new(MetricKind::Volume, 1.0, at(5)));
        log.insert(Reading::new(MetricKind::Volume, 2.0, at(1)));
        log.insert(Reading::new(MetricKind::Volume, 3.0, at(3)));

        let values: Vec<f64> = log.all().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 1.0]);
        assert_eq!(log.last().unwrap().timestamp, at(5));
    }

    #[test]
    fn equal_timestamps_keep_append_order() {
        let log = TimeSeriesLog::new("flow_out");
        let when = at(0) + TimeDelta::milliseconds(250);
        log.insert(Reading::new(MetricKind::FlowOut, 1.0, when));
        log.insert(Reading::new(MetricKind::FlowOut, 2.0, when));
        assert_eq!(log.last().unwrap().value, 2.0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let log = TimeSeriesLog::new("flow_in");
        log.insert(Reading::new(MetricKind::FlowIn, 1.0, at(0)));
        let snapshot = log.all();
        log.insert(Reading::new(MetricKind::FlowIn, 2.0, at(1)));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(snapshot, log.all().into_iter().take(1).collect::<Vec<_>>());
    }
}
