use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::Error;

/// Track Citron transport metrics without external dependencies.
pub(crate) struct Metrics;

static PACKAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static RESPONSES_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_READ: AtomicU64 = AtomicU64::new(0);
static BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static HANDLER_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static HANDLER_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

struct ErrorCounters {
    protocol: AtomicU64,
    io: AtomicU64,
    handler: AtomicU64,
    other: AtomicU64,
}

static ERROR_COUNTERS: ErrorCounters = ErrorCounters::new();

impl ErrorCounters {
    const fn new() -> Self {
        Self {
            protocol: AtomicU64::new(0),
            io: AtomicU64::new(0),
            handler: AtomicU64::new(0),
            other: AtomicU64::new(0),
        }
    }

    fn increment(&self, err: &Error) {
        match err {
            Error::ProtocolMismatch { .. }
            | Error::MalformedHeader { .. }
            | Error::NegativeLength { .. } => self.protocol.fetch_add(1, Ordering::Relaxed),
            Error::Io(_) | Error::ShortWrite { .. } => self.io.fetch_add(1, Ordering::Relaxed),
            Error::Handler(_) => self.handler.fetch_add(1, Ordering::Relaxed),
            Error::ConnectionClosed | Error::AlreadyClosed => {
                self.other.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

impl Metrics {
    #[inline]
    pub(crate) fn record_package_received() {
        PACKAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_response_sent() {
        RESPONSES_SENT.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_bytes_read(count: usize) {
        BYTES_READ.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_bytes_written(count: usize) {
        BYTES_WRITTEN.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error(err: &Error) {
        ERROR_COUNTERS.increment(err);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        CONNECTIONS_OPENED.fetch_add(1, Ordering::Relaxed);
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_handler_latency(duration: Duration) {
        let nanos = duration
            .as_nanos()
            .min(u128::from(u64::MAX))
            .try_into()
            .unwrap_or(u64::MAX);

        HANDLER_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&HANDLER_LATENCY_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            packages_received: PACKAGES_RECEIVED.load(Ordering::Relaxed),
            responses_sent: RESPONSES_SENT.load(Ordering::Relaxed),
            bytes_read: BYTES_READ.load(Ordering::Relaxed),
            bytes_written: BYTES_WRITTEN.load(Ordering::Relaxed),
            protocol_errors: ERROR_COUNTERS.protocol.load(Ordering::Relaxed),
            io_errors: ERROR_COUNTERS.io.load(Ordering::Relaxed),
            handler_errors: ERROR_COUNTERS.handler.load(Ordering::Relaxed),
            other_errors: ERROR_COUNTERS.other.load(Ordering::Relaxed),
            connections_opened: CONNECTIONS_OPENED.load(Ordering::Relaxed),
            active_connections: ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            handler_latency_total_ns: HANDLER_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
            handler_latency_max_ns: HANDLER_LATENCY_MAX_NS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Take a snapshot of the process-wide transport counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

/// Lightweight snapshot of critical counters.
#[derive(Default, Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub packages_received: u64,
    pub responses_sent: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub protocol_errors: u64,
    pub io_errors: u64,
    pub handler_errors: u64,
    pub other_errors: u64,
    pub connections_opened: u64,
    pub active_connections: u64,
    pub handler_latency_total_ns: u64,
    pub handler_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average time spent in the package-complete hook, in microseconds.
    #[must_use]
    pub fn avg_handler_latency_us(&self) -> Option<u64> {
        if self.packages_received == 0 {
            return None;
        }

        let total_ns = u128::from(self.handler_latency_total_ns);
        let per_package = total_ns
            / (u128::from(self.packages_received) * NANOSECONDS_PER_MICROSECOND);
        Some(u64::try_from(per_package).unwrap_or(u64::MAX))
    }
}
