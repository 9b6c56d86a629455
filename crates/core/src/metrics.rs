//! Metrics boundary between the storage layer and whatever backend records
//! latency and errors.
//!
//! Sinks are injected into each store at construction; there is no
//! process-wide registry.

use crate::errors::Result;
use std::time::{Duration, Instant};

/// Receives per-operation latency observations and error counts
pub trait MetricsSink: Send + Sync {
    fn observe(&self, operation: &'static str, elapsed: Duration);

    fn record_error(&self, operation: &'static str);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe(&self, _operation: &'static str, _elapsed: Duration) {}

    fn record_error(&self, _operation: &'static str) {}
}

/// Run `f`, reporting its latency and, on failure, an error for `operation`
pub fn instrument<T, F>(sink: &dyn MetricsSink, operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let started = Instant::now();
    let result = f();
    sink.observe(operation, started.elapsed());
    if result.is_err() {
        sink.record_error(operation);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tally {
        observed: Mutex<Vec<&'static str>>,
        errors: Mutex<Vec<&'static str>>,
    }

    impl MetricsSink for Tally {
        fn observe(&self, operation: &'static str, _elapsed: Duration) {
            self.observed.lock().unwrap().push(operation);
        }

        fn record_error(&self, operation: &'static str) {
            self.errors.lock().unwrap().push(operation);
        }
    }

    #[test]
    fn test_instrument_records_latency_and_errors() {
        let tally = Tally::default();

        let ok: Result<u32> = instrument(&tally, "get", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let failed: Result<u32> = instrument(&tally, "put", || Err(Error::storage("put", "full")));
        assert!(failed.is_err());

        assert_eq!(*tally.observed.lock().unwrap(), vec!["get", "put"]);
        assert_eq!(*tally.errors.lock().unwrap(), vec!["put"]);
    }
}
