//! Scope timers that report into [`Telemetry`]

use crate::aggregator::Telemetry;
use std::time::Instant;

/// Records the elapsed time of a scope when dropped
///
/// Early returns and `?` still produce a sample. Call [`ScopedTimer::stop`]
/// to record explicitly and get the measured value back.
#[derive(Debug)]
#[must_use = "a timer records when dropped; binding it to `_` drops it immediately"]
pub struct ScopedTimer {
    telemetry: Telemetry,
    name: String,
    started: Instant,
    recorded: bool,
}

impl ScopedTimer {
    pub(crate) fn new(telemetry: Telemetry, name: impl Into<String>) -> Self {
        Self {
            telemetry,
            name: name.into(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Milliseconds since the timer started
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Record now and return the duration in milliseconds
    pub fn stop(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let elapsed = self.elapsed_ms();
        if !self.recorded {
            self.recorded = true;
            self.telemetry.record_duration(&self.name, elapsed);
        }
        elapsed
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod tests {
    use crate::Telemetry;

    #[test]
    fn timer_records_on_drop() {
        let telemetry = Telemetry::default();
        {
            let _timer = telemetry.timer("scope");
        }
        assert_eq!(telemetry.report().operations["scope"].sample_count, 1);
    }

    #[test]
    fn stop_records_exactly_once() {
        let telemetry = Telemetry::default();
        let timer = telemetry.timer("scope");
        let elapsed = timer.stop();
        assert!(elapsed >= 0.0);
        assert_eq!(telemetry.samples("scope").len(), 1);
    }
}
