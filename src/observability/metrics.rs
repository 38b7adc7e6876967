//! Thread-safe processing counters for a processor instance
//!
//! One collector is owned by each processor worker and shared with its HTTP
//! surface; there is no process-wide instance.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_TIMING_SAMPLES: usize = 1000;

/// Counters for filing intake, rule processing and export
#[derive(Debug)]
pub struct ProcessorMetrics {
    filings_staged: AtomicU64,
    staging_failures: AtomicU64,
    filings_in_flight: AtomicU64,
    max_in_flight_reached: AtomicU64,
    filings_exported: AtomicU64,
    filings_failed: AtomicU64,
    duplicate_submissions: AtomicU64,
    optional_rule_failures: AtomicU64,
    export_files_written: AtomicU64,
    export_failures: AtomicU64,
    started_at: AtomicU64,
    processing_times: Mutex<VecDeque<u64>>,
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self {
            filings_staged: AtomicU64::new(0),
            staging_failures: AtomicU64::new(0),
            filings_in_flight: AtomicU64::new(0),
            max_in_flight_reached: AtomicU64::new(0),
            filings_exported: AtomicU64::new(0),
            filings_failed: AtomicU64::new(0),
            duplicate_submissions: AtomicU64::new(0),
            optional_rule_failures: AtomicU64::new(0),
            export_files_written: AtomicU64::new(0),
            export_failures: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            processing_times: Mutex::new(VecDeque::new()),
        }
    }

    pub fn filings_staged(&self, count: usize) {
        self.filings_staged
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn staging_failed(&self, count: usize) {
        self.staging_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn filing_started(&self) {
        let in_flight = self.filings_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight_reached
            .fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn filing_exported(&self, duration: Duration) {
        self.filings_exported.fetch_add(1, Ordering::Relaxed);
        self.filings_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn filing_failed(&self, duration: Duration) {
        self.filings_failed.fetch_add(1, Ordering::Relaxed);
        self.filings_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn duplicate_submission(&self) {
        self.duplicate_submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn optional_rule_failed(&self) {
        self.optional_rule_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn export_written(&self) {
        self.export_files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn export_failed(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push_back(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.pop_front();
            }
        }
    }

    fn average_processing_ms(&self) -> f64 {
        match self.processing_times.lock() {
            Ok(times) if !times.is_empty() => {
                times.iter().sum::<u64>() as f64 / times.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            filings_staged: self.filings_staged.load(Ordering::Relaxed),
            staging_failures: self.staging_failures.load(Ordering::Relaxed),
            filings_in_flight: self.filings_in_flight.load(Ordering::Relaxed),
            max_in_flight_reached: self.max_in_flight_reached.load(Ordering::Relaxed),
            filings_exported: self.filings_exported.load(Ordering::Relaxed),
            filings_failed: self.filings_failed.load(Ordering::Relaxed),
            duplicate_submissions: self.duplicate_submissions.load(Ordering::Relaxed),
            optional_rule_failures: self.optional_rule_failures.load(Ordering::Relaxed),
            export_files_written: self.export_files_written.load(Ordering::Relaxed),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            avg_processing_time_ms: self.average_processing_ms(),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub filings_staged: u64,
    pub staging_failures: u64,
    pub filings_in_flight: u64,
    pub max_in_flight_reached: u64,
    pub filings_exported: u64,
    pub filings_failed: u64,
    pub duplicate_submissions: u64,
    pub optional_rule_failures: u64,
    pub export_files_written: u64,
    pub export_failures: u64,
    pub avg_processing_time_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
