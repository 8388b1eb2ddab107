use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// At most one holder at a time; contenders are turned away instead of queued
#[derive(Clone, Debug, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its flight when dropped, on every exit path including unwinding
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
