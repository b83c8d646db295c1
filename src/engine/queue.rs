// src/engine/queue.rs

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::dag::ConcurrencyLimit;
use crate::engine::{UnitId, UnitSpec};
use crate::errors::FailureReason;

/// Units of one activated node, released under its concurrency limit.
///
/// Semantics:
/// - Units are released in queue (assignment) order; completions may come
///   back in any order.
/// - At most `limit` units are in flight at any instant.
/// - Up to `tolerance` failed units are absorbed. Once failures exceed it,
///   nothing further is released; the verdict is given when the units
///   already in flight have reported.
#[derive(Debug)]
pub struct UnitQueue {
    limit: ConcurrencyLimit,
    tolerance: usize,
    pending: VecDeque<UnitSpec>,
    in_flight: BTreeMap<usize, String>,
    total: usize,
    failed: usize,
    first_failure: Option<FailureReason>,
    peak_in_flight: usize,
}

impl UnitQueue {
    pub fn new(limit: ConcurrencyLimit, tolerance: usize, units: Vec<UnitSpec>) -> Self {
        Self {
            limit,
            tolerance,
            total: units.len(),
            pending: units.into(),
            in_flight: BTreeMap::new(),
            failed: 0,
            first_failure: None,
            peak_in_flight: 0,
        }
    }

    /// Release as many queued units as the limit allows.
    pub fn release(&mut self) -> Vec<UnitSpec> {
        let mut released = Vec::new();
        if self.tolerance_exceeded() {
            return released;
        }

        while self.limit.allows(self.in_flight.len()) {
            let Some(unit) = self.pending.pop_front() else {
                break;
            };
            debug!(unit = %unit.label(), "releasing unit");
            self.in_flight.insert(unit.id.index, unit.label());
            released.push(unit);
        }

        self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());
        released
    }

    /// Record the end of an in-flight unit. Returns `false` for a unit this
    /// queue is not waiting on.
    pub fn complete(&mut self, unit: UnitId, failure: Option<FailureReason>) -> bool {
        if self.in_flight.remove(&unit.index).is_none() {
            warn!(?unit, "completion for a unit that is not in flight; ignoring");
            return false;
        }

        if let Some(reason) = failure {
            self.failed += 1;
            if self.first_failure.is_none() {
                self.first_failure = Some(reason);
            }
        }
        true
    }

    /// `Some` once no unit is in flight and either every unit has run or
    /// the tolerance was exceeded.
    pub fn verdict(&self) -> Option<Result<(), FailureReason>> {
        if !self.in_flight.is_empty() {
            return None;
        }

        if self.tolerance_exceeded() {
            let reason = match (&self.first_failure, self.total) {
                (Some(reason), 1) => reason.clone(),
                _ => FailureReason::Units {
                    failed: self.failed,
                    total: self.total,
                    tolerance: self.tolerance,
                },
            };
            return Some(Err(reason));
        }

        if self.pending.is_empty() {
            if self.failed > 0 {
                warn!(
                    failed = self.failed,
                    tolerance = self.tolerance,
                    "unit failures absorbed by fault tolerance"
                );
            }
            return Some(Ok(()));
        }

        None
    }

    /// Labels of units currently in flight.
    pub fn outstanding(&self) -> impl Iterator<Item = &str> {
        self.in_flight.values().map(|s| s.as_str())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Highest number of units that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    fn tolerance_exceeded(&self) -> bool {
        self.failed > self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn units(n: usize) -> Vec<UnitSpec> {
        (0..n)
            .map(|index| UnitSpec {
                id: UnitId { owner: 0, index },
                owner: "compute".to_string(),
                target: Some(format!("node-{index}")),
                steps: Vec::new(),
            })
            .collect()
    }

    fn id(index: usize) -> UnitId {
        UnitId { owner: 0, index }
    }

    fn bounded(n: usize) -> ConcurrencyLimit {
        ConcurrencyLimit::Bounded(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn one_by_one_releases_next_only_after_completion() {
        let mut q = UnitQueue::new(bounded(1), 0, units(3));
        let first = q.release();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id.index, 0);
        assert!(q.release().is_empty());

        q.complete(id(0), None);
        assert_eq!(q.release()[0].id.index, 1);
        q.complete(id(1), None);
        assert_eq!(q.release()[0].id.index, 2);
        q.complete(id(2), None);

        assert_eq!(q.verdict(), Some(Ok(())));
        assert_eq!(q.peak_in_flight(), 1);
    }

    #[test]
    fn bounded_parallel_never_exceeds_amount() {
        let mut q = UnitQueue::new(bounded(6), 0, units(10));
        assert_eq!(q.release().len(), 6);
        assert_eq!(q.in_flight(), 6);

        q.complete(id(3), None);
        let next = q.release();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id.index, 6);
        assert!(q.verdict().is_none());
        assert_eq!(q.peak_in_flight(), 6);
    }

    #[test]
    fn unbounded_releases_everything() {
        let mut q = UnitQueue::new(ConcurrencyLimit::Unbounded, 0, units(10));
        assert_eq!(q.release().len(), 10);
    }

    #[test]
    fn failure_stops_further_releases_and_waits_for_in_flight() {
        let mut q = UnitQueue::new(bounded(2), 0, units(4));
        q.release();
        q.complete(id(0), Some(FailureReason::Executor("boom".into())));
        assert!(q.release().is_empty());
        assert!(q.verdict().is_none());

        q.complete(id(1), None);
        assert_eq!(
            q.verdict(),
            Some(Err(FailureReason::Units {
                failed: 1,
                total: 4,
                tolerance: 0
            }))
        );
    }

    #[test]
    fn tolerance_absorbs_failures() {
        let mut q = UnitQueue::new(ConcurrencyLimit::Unbounded, 1, units(3));
        q.release();
        q.complete(id(0), None);
        q.complete(id(1), Some(FailureReason::Timeout(std::time::Duration::from_secs(1))));
        q.complete(id(2), None);
        assert_eq!(q.verdict(), Some(Ok(())));
    }

    #[test]
    fn single_unit_failure_keeps_its_reason() {
        let mut q = UnitQueue::new(ConcurrencyLimit::Unbounded, 0, units(1));
        q.release();
        q.complete(id(0), Some(FailureReason::Executor("exit 1".into())));
        assert_eq!(
            q.verdict(),
            Some(Err(FailureReason::Executor("exit 1".into())))
        );
    }

    #[test]
    fn empty_queue_succeeds_immediately() {
        let q = UnitQueue::new(bounded(1), 0, Vec::new());
        assert_eq!(q.verdict(), Some(Ok(())));
    }
}
