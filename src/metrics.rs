use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::ProtocolError;

/// What a serviced request contributed to the metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSummary {
    /// primes produced by the request
    pub primes_found: u64,
    /// time spent waiting on the worker pool, zero for requests that bypass it
    pub compute_time: Duration,
    /// set if the request failed after parsing (domain error or worker failure)
    pub error: Option<String>,
}

impl RequestSummary {
    /// a request that succeeded and produced `primes_found` primes in `compute_time`
    pub fn computed(primes_found: u64, compute_time: Duration) -> Self {
        RequestSummary {
            primes_found,
            compute_time,
            error: None,
        }
    }

    /// a request that was parsed but could not be serviced
    pub fn failed(error: impl Into<String>) -> Self {
        RequestSummary {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// An immutable copy of the server metrics, taken while holding the metrics lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// every parsed request, whatever its outcome
    pub total_requests: u64,
    /// `total_requests` broken down by command; the values always add up to the total
    pub requests_by_command: BTreeMap<String, u64>,
    /// primes produced by all `prime`, `range` and `count` requests
    pub primes_found_total: u64,
    /// parsed requests that ended with an error response
    pub failed_requests: u64,
    /// lines that could not be parsed into a request
    pub invalid_requests: u64,
    /// sessions currently open
    pub active_connections: u64,
    /// sessions that have ended
    pub completed_connections: u64,
    /// seconds since the metrics store was created
    pub uptime_seconds: u64,
    /// mean time spent in the worker pool per computation
    pub average_compute_ms: f64,
    /// longest time spent in the worker pool by a single computation
    pub max_compute_ms: f64,
    /// the most recent error reported to any client
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    by_command: BTreeMap<Command, u64>,
    primes_found: u64,
    failed: u64,
    invalid: u64,
    active_connections: u64,
    completed_connections: u64,
    computations: u64,
    compute_total: Duration,
    compute_max: Duration,
    last_error: Option<String>,
}

/// Process wide usage counters shared by every session.
///
/// The store is created when the server starts and handed to each session behind an `Arc`.
/// All counters sit behind one [`Mutex`], so every operation, readers included, sees and
/// leaves a consistent view of all fields. The lock is only held for counter arithmetic.
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    counters: Mutex<Counters>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

impl Metrics {
    /// creates a store with all counters at zero, and starts the uptime clock
    pub fn new() -> Self {
        let by_command = Command::ALL.iter().map(|cmd| (*cmd, 0)).collect();
        Metrics {
            started: Instant::now(),
            counters: Mutex::new(Counters {
                by_command,
                ..Default::default()
            }),
        }
    }

    // counters are plain integers, a panic elsewhere cannot leave them half written
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// records one parsed request of type `command`
    pub fn record(&self, command: Command, summary: &RequestSummary) {
        let mut c = self.lock();
        c.total_requests += 1;
        *c.by_command.entry(command).or_insert(0) += 1;
        c.primes_found += summary.primes_found;
        if !summary.compute_time.is_zero() {
            c.computations += 1;
            c.compute_total += summary.compute_time;
            c.compute_max = c.compute_max.max(summary.compute_time);
        }
        if let Some(err) = &summary.error {
            c.failed += 1;
            c.last_error = Some(err.clone());
        }
    }

    /// records a line that could not be parsed
    pub fn record_invalid(&self, err: &ProtocolError) {
        let mut c = self.lock();
        c.invalid += 1;
        c.last_error = Some(err.to_string());
    }

    /// a new session has started
    pub fn connection_opened(&self) {
        self.lock().active_connections += 1;
    }

    /// a session has ended
    pub fn connection_closed(&self) {
        let mut c = self.lock();
        c.active_connections = c.active_connections.saturating_sub(1);
        c.completed_connections += 1;
    }

    /// a consistent copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.started.elapsed();
        let c = self.lock();
        let average_compute_ms = if c.computations == 0 {
            0.0
        } else {
            millis(c.compute_total) / c.computations as f64
        };
        MetricsSnapshot {
            total_requests: c.total_requests,
            requests_by_command: c
                .by_command
                .iter()
                .map(|(cmd, count)| (cmd.to_string(), *count))
                .collect(),
            primes_found_total: c.primes_found,
            failed_requests: c.failed,
            invalid_requests: c.invalid,
            active_connections: c.active_connections,
            completed_connections: c.completed_connections,
            uptime_seconds: uptime.as_secs(),
            average_compute_ms,
            max_compute_ms: millis(c.compute_max),
            last_error: c.last_error.clone(),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_zero_with_every_command_listed() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.requests_by_command.len(), Command::ALL.len());
        assert!(snap.requests_by_command.values().all(|v| *v == 0));
        assert_eq!(snap.last_error, None);
        assert_eq!(snap.average_compute_ms, 0.0);
    }

    #[test]
    fn record_updates_all_fields() {
        let metrics = Metrics::new();
        metrics.record(
            Command::Range,
            &RequestSummary::computed(4, Duration::from_millis(10)),
        );
        metrics.record(
            Command::Count,
            &RequestSummary::computed(6, Duration::from_millis(30)),
        );
        metrics.record(Command::Range, &RequestSummary::failed("invalid range"));
        metrics.record(Command::Stats, &RequestSummary::default());
        metrics.record_invalid(&ProtocolError::InvalidArgument(Command::Prime));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.requests_by_command["range"], 2);
        assert_eq!(snap.requests_by_command["count"], 1);
        assert_eq!(snap.requests_by_command["stats"], 1);
        assert_eq!(snap.primes_found_total, 10);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.invalid_requests, 1);
        assert_eq!(snap.last_error.as_deref(), Some("invalid argument"));
        assert!((snap.average_compute_ms - 20.0).abs() < 1e-6);
        assert!((snap.max_compute_ms - 30.0).abs() < 1e-6);
    }

    #[test]
    fn connections() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        let snap = metrics.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.completed_connections, 1);
    }

    #[test]
    fn concurrent_writers_never_tear_a_snapshot() {
        const THREADS: usize = 8;
        const PER_THREAD: u64 = 500;
        let metrics = Arc::new(Metrics::new());

        let writers: Vec<_> = (0..THREADS)
            .map(|i| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    let cmd = Command::ALL[i % Command::ALL.len()];
                    for _ in 0..PER_THREAD {
                        metrics.record(cmd, &RequestSummary::computed(2, Duration::ZERO));
                    }
                })
            })
            .collect();

        let reader = {
            let metrics = Arc::clone(&metrics);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snap = metrics.snapshot();
                    let sum: u64 = snap.requests_by_command.values().sum();
                    assert_eq!(sum, snap.total_requests);
                    assert_eq!(snap.primes_found_total, 2 * snap.total_requests);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(
            metrics.snapshot().total_requests,
            THREADS as u64 * PER_THREAD
        );
    }
}
