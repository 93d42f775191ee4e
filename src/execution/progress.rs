//! Progress tracking for segmentation runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// The run has started.
    Started {
        /// Backend name.
        backend: String,
        /// Worker count.
        workers: usize,
    },
    /// A worker has finished a round (merge plus halo exchange).
    RoundCompleted {
        /// Worker rank.
        rank: usize,
        /// Zero-based round index.
        round: u32,
        /// Whether the worker's merge changed any label.
        changed: bool,
    },
    /// Overall progress percentage, only sent when the round budget is known.
    Progress {
        /// Completed share of worker rounds, 0 to 100.
        percent: f32,
        /// Time since start.
        elapsed_ms: u64,
        /// Extrapolated from the mean round time.
        estimated_remaining_ms: Option<u64>,
    },
    /// No worker changed anything in the last round.
    Converged {
        /// Rounds run.
        rounds: u32,
    },
    /// The run has completed.
    Completed {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Rounds run.
        rounds: u32,
    },
    /// An error occurred.
    Error {
        /// Failing worker, if known.
        rank: Option<usize>,
        /// Error text.
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks run progress across worker threads.
pub struct ProgressTracker {
    /// Number of workers reporting rounds.
    workers: usize,
    /// Round budget, if the convergence policy has one.
    round_limit: Option<u32>,
    /// Worker-rounds completed.
    completed_rounds: AtomicU64,
    /// Start time.
    start_time: Option<Instant>,
    /// Progress callback.
    callback: Option<ProgressCallback>,
    /// Round durations for estimation.
    round_times: parking_lot::Mutex<Vec<u64>>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new(workers: usize, round_limit: Option<u32>) -> Self {
        Self {
            workers,
            round_limit,
            completed_rounds: AtomicU64::new(0),
            start_time: None,
            callback: None,
            round_times: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking.
    pub fn start(&mut self, backend: &str) {
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            backend: backend.to_string(),
            workers: self.workers,
        });
    }

    /// Report that a worker has finished a round.
    pub fn round_completed(&self, rank: usize, round: u32, changed: bool, duration_ms: u64) {
        self.completed_rounds.fetch_add(1, Ordering::Relaxed);
        self.round_times.lock().push(duration_ms);

        self.send_update(ProgressUpdate::RoundCompleted {
            rank,
            round,
            changed,
        });

        if self.round_limit.is_some() {
            self.send_progress_update();
        }
    }

    /// Report global convergence.
    pub fn converged(&self, rounds: u32) {
        self.send_update(ProgressUpdate::Converged { rounds });
    }

    /// Report an error.
    pub fn report_error(&self, rank: Option<usize>, message: String) {
        self.send_update(ProgressUpdate::Error { rank, message });
    }

    /// Complete tracking.
    pub fn complete(&self, rounds: u32) {
        self.send_update(ProgressUpdate::Completed {
            duration_ms: self.elapsed_ms(),
            rounds,
        });
    }

    /// Worker-rounds completed so far.
    pub fn completed_rounds(&self) -> u64 {
        self.completed_rounds.load(Ordering::Relaxed)
    }

    /// Get current progress percentage, if the round budget is known.
    pub fn progress_percent(&self) -> Option<f32> {
        let total = self.total_rounds()?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.completed_rounds() as f32 / total as f32 * 100.0).min(100.0))
    }

    /// Estimate remaining time in milliseconds.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let total = self.total_rounds()?;
        let times = self.round_times.lock();
        if times.is_empty() {
            return None;
        }

        // Workers run their rounds concurrently.
        let avg_time: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let remaining = total.saturating_sub(self.completed_rounds());
        Some(avg_time * remaining / self.workers.max(1) as u64)
    }

    fn total_rounds(&self) -> Option<u64> {
        self.round_limit
            .map(|limit| limit as u64 * self.workers as u64)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self) {
        let Some(percent) = self.progress_percent() else {
            return;
        };
        self.send_update(ProgressUpdate::Progress {
            percent,
            elapsed_ms: self.elapsed_ms(),
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(1, None)
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("workers", &self.workers)
            .field("round_limit", &self.round_limit)
            .field("completed_rounds", &self.completed_rounds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_progress_calculation() {
        let tracker = ProgressTracker::new(2, Some(5));
        assert_eq!(tracker.progress_percent(), Some(0.0));

        tracker.completed_rounds.store(5, Ordering::Relaxed);
        assert_eq!(tracker.progress_percent(), Some(50.0));

        tracker.completed_rounds.store(10, Ordering::Relaxed);
        assert_eq!(tracker.progress_percent(), Some(100.0));
    }

    #[test]
    fn test_unbounded_has_no_percentage() {
        let tracker = ProgressTracker::new(4, None);
        tracker.round_completed(0, 1, true, 3);
        assert_eq!(tracker.progress_percent(), None);
        assert_eq!(tracker.estimated_remaining_ms(), None);
        assert_eq!(tracker.completed_rounds(), 1);
    }

    #[test]
    fn test_estimate() {
        let tracker = ProgressTracker::new(2, Some(3));
        tracker.round_completed(0, 1, true, 10);
        tracker.round_completed(1, 1, true, 30);
        // 4 worker-rounds left at 20ms each, two at a time.
        assert_eq!(tracker.estimated_remaining_ms(), Some(40));
    }

    #[test]
    fn test_callback_invoked() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let mut tracker = ProgressTracker::new(1, Some(2)).with_callback(Box::new(move |_| {
            call_count_clone.fetch_add(1, Ordering::Relaxed);
        }));

        tracker.start("distributed");
        tracker.round_completed(0, 1, true, 1);
        tracker.converged(1);
        tracker.complete(1);

        // Started, RoundCompleted, Progress, Converged, Completed
        assert_eq!(call_count.load(Ordering::Relaxed), 5);
    }
}
