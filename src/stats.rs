//! Pipeline counters, readable from any thread

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    bypassed: AtomicU64,
    admitted: AtomicU64,
    dropped_rate: AtomicU64,
    dropped_busy: AtomicU64,
    emitted: AtomicU64,
    dropped_stale: AtomicU64,
    discarded_background: AtomicU64,
    format_errors: AtomicU64,
    resource_errors: AtomicU64,
    consumer_errors: AtomicU64,
    detection_fallbacks: AtomicU64,
    processed: AtomicU64,
    processing_nanos: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub bypassed: u64,
    pub admitted: u64,
    pub dropped_rate: u64,
    pub dropped_busy: u64,
    pub emitted: u64,
    pub dropped_stale: u64,
    pub discarded_background: u64,
    pub format_errors: u64,
    pub resource_errors: u64,
    pub consumer_errors: u64,
    pub detection_fallbacks: u64,
    pub processed: u64,
    pub processing_time: Duration,
}

impl StatsSnapshot {
    pub fn average_processing(&self) -> Duration {
        if self.processed == 0 {
            Duration::ZERO
        } else {
            self.processing_time / self.processed as u32
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_rate + self.dropped_busy + self.dropped_stale + self.discarded_background
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn received(&self) {
        bump(&self.received);
    }

    pub fn bypassed(&self) {
        bump(&self.bypassed);
    }

    pub fn admitted(&self) {
        bump(&self.admitted);
    }

    pub fn dropped_rate(&self) {
        bump(&self.dropped_rate);
    }

    pub fn dropped_busy(&self) {
        bump(&self.dropped_busy);
    }

    /// Returns the new emitted total
    pub fn emitted(&self) -> u64 {
        self.emitted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dropped_stale(&self) {
        bump(&self.dropped_stale);
    }

    pub fn discarded_background(&self) {
        bump(&self.discarded_background);
    }

    pub fn format_error(&self) {
        bump(&self.format_errors);
    }

    pub fn resource_error(&self) {
        bump(&self.resource_errors);
    }

    pub fn consumer_error(&self) {
        bump(&self.consumer_errors);
    }

    pub fn detection_fallback(&self) {
        bump(&self.detection_fallbacks);
    }

    pub fn processed(&self, took: Duration) {
        bump(&self.processed);
        self.processing_nanos
            .fetch_add(took.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            bypassed: load(&self.bypassed),
            admitted: load(&self.admitted),
            dropped_rate: load(&self.dropped_rate),
            dropped_busy: load(&self.dropped_busy),
            emitted: load(&self.emitted),
            dropped_stale: load(&self.dropped_stale),
            discarded_background: load(&self.discarded_background),
            format_errors: load(&self.format_errors),
            resource_errors: load(&self.resource_errors),
            consumer_errors: load(&self.consumer_errors),
            detection_fallbacks: load(&self.detection_fallbacks),
            processed: load(&self.processed),
            processing_time: Duration::from_nanos(load(&self.processing_nanos)),
        }
    }

    /// One-line summary at info level
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            "Frames: received={}, admitted={}, bypassed={}, emitted={}, dropped={} (rate={}, busy={}, stale={}, background={}), errors={}, fallbacks={}, process={:.1}ms",
            s.received,
            s.admitted,
            s.bypassed,
            s.emitted,
            s.dropped(),
            s.dropped_rate,
            s.dropped_busy,
            s.dropped_stale,
            s.discarded_background,
            s.format_errors + s.resource_errors + s.consumer_errors,
            s.detection_fallbacks,
            s.average_processing().as_secs_f64() * 1000.0
        );
    }
}
