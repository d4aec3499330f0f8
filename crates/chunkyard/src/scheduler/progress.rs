use core::fmt;
use core::time::Duration;
use tokio::time::Instant;

/// Outcome of a single chunk as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Results were written and the completion bit is set.
    Ok,
    /// The chunk failed; it stays pending for the next run.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Progress record emitted after every finished chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    /// Worker that ran the chunk, when the queue reports it.
    pub worker: Option<usize>,
    pub chunk: usize,
    /// Time the worker spent on the chunk.
    pub execution: Duration,
    pub status: UnitStatus,
    /// Chunks of this run that have not finished yet.
    pub remaining: usize,
    /// Chunks submitted in this run.
    pub dispatched: usize,
    /// Estimated time until the last chunk finishes, from the observed
    /// completion rate.
    pub eta: Duration,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.worker {
            Some(worker) => write!(f, "worker: {worker}; ")?,
            None => f.write_str("worker: ?; ")?,
        }
        write!(
            f,
            "chunk {}; {:.3}s; status: {}; {}/{} remaining; eta {}s",
            self.chunk,
            self.execution.as_secs_f64(),
            self.status,
            self.remaining,
            self.dispatched,
            self.eta.as_secs()
        )
    }
}

/// Turns finished chunks into [`ProgressReport`]s.
///
/// The ETA assumes the remaining chunks finish at the average rate observed
/// since dispatch: `elapsed * remaining / finished`.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    started: Instant,
    dispatched: usize,
    finished: usize,
}

impl ProgressTracker {
    pub fn new(dispatched: usize) -> Self {
        Self {
            started: Instant::now(),
            dispatched,
            finished: 0,
        }
    }

    pub fn record(
        &mut self,
        worker: Option<usize>,
        chunk: usize,
        execution: Duration,
        status: UnitStatus,
    ) -> ProgressReport {
        self.finished += 1;
        let remaining = self.dispatched.saturating_sub(self.finished);
        let eta = self
            .started
            .elapsed()
            .mul_f64(remaining as f64 / self.finished as f64);
        ProgressReport {
            worker,
            chunk,
            execution,
            status,
            remaining,
            dispatched: self.dispatched,
            eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn eta_extrapolates_observed_rate() {
        let mut tracker = ProgressTracker::new(4);

        tokio::time::advance(Duration::from_secs(10)).await;
        let first = tracker.record(Some(0), 2, Duration::from_secs(9), UnitStatus::Ok);
        assert_eq!(first.remaining, 3);
        assert_eq!(first.eta, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = tracker.record(Some(1), 0, Duration::from_secs(9), UnitStatus::Failed);
        assert_eq!(second.remaining, 2);
        assert_eq!(second.eta, Duration::from_secs(20));

        tracker.record(None, 1, Duration::ZERO, UnitStatus::Ok);
        let last = tracker.record(None, 3, Duration::ZERO, UnitStatus::Ok);
        assert_eq!(last.remaining, 0);
        assert_eq!(last.eta, Duration::ZERO);
    }

    #[test]
    fn report_formats_like_a_status_line() {
        let report = ProgressReport {
            worker: Some(3),
            chunk: 17,
            execution: Duration::from_millis(1500),
            status: UnitStatus::Ok,
            remaining: 4,
            dispatched: 20,
            eta: Duration::from_secs(42),
        };
        assert_eq!(
            report.to_string(),
            "worker: 3; chunk 17; 1.500s; status: ok; 4/20 remaining; eta 42s"
        );
    }
}
