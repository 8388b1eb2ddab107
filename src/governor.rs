//! Frame admission: rate limiting plus single-flight processing

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::flight::{FlightGuard, SingleFlight};
use crate::frame::Timestamp;

/// Highest accepted target frame rate
pub const MAX_FRAME_RATE: f64 = 240.0;

pub(crate) fn validate_frame_rate(fps: f64) -> Result<(), ConfigError> {
    if !fps.is_finite() || fps <= 0.0 || fps > MAX_FRAME_RATE {
        return Err(ConfigError::FrameRateOutOfRange(fps));
    }
    Ok(())
}

/// Outcome of offering a frame to the governor
#[derive(Debug)]
pub enum Admission {
    /// Process the frame; processing ends when the guard drops
    Admitted(FlightGuard),
    /// Less than one target interval since the last admitted frame
    TooSoon,
    /// A previous frame is still being processed
    Busy,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[derive(Debug)]
pub struct FrameGovernor {
    flight: SingleFlight,
    last_admitted: Mutex<Option<Timestamp>>,
    interval_nanos: AtomicU64,
}

impl FrameGovernor {
    pub fn new(frame_rate: f64) -> Result<Self, ConfigError> {
        let governor = Self {
            flight: SingleFlight::new(),
            last_admitted: Mutex::new(None),
            interval_nanos: AtomicU64::new(0),
        };
        governor.set_target_frame_rate(frame_rate)?;
        Ok(governor)
    }

    /// Admit `timestamp` when a full interval has passed since the last
    /// admitted frame (inclusive) and nothing is in flight
    pub fn admit(&self, timestamp: Timestamp) -> Admission {
        let Some(guard) = self.flight.try_acquire() else {
            return Admission::Busy;
        };

        let mut last = self.last_admitted.lock();
        if let Some(previous) = *last {
            let elapsed = timestamp.saturating_since(previous);
            if elapsed < self.interval() {
                // The guard drops here and the flight is released untouched
                return Admission::TooSoon;
            }
        }
        *last = Some(timestamp);
        Admission::Admitted(guard)
    }

    pub fn set_target_frame_rate(&self, fps: f64) -> Result<(), ConfigError> {
        validate_frame_rate(fps)?;
        // Truncated, so a source running exactly at the target rate is never early
        let nanos = (1e9 / fps).floor() as u64;
        self.interval_nanos.store(nanos, Ordering::Release);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Acquire))
    }

    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    pub fn last_admitted(&self) -> Option<Timestamp> {
        *self.last_admitted.lock()
    }

    /// Forget the last admitted frame so the next one is admitted immediately
    pub fn reset(&self) {
        *self.last_admitted.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn governor() -> FrameGovernor {
        // 40 ms interval
        FrameGovernor::new(25.0).unwrap()
    }

    #[test]
    fn first_frame_is_admitted() {
        assert!(governor().admit(Timestamp::from_nanos(7)).is_admitted());
    }

    #[test]
    fn boundary_is_inclusive() {
        let g = governor();
        drop(g.admit(Timestamp::from_nanos(0)));
        assert!(matches!(g.admit(Timestamp::from_nanos(40 * MS - 1)), Admission::TooSoon));
        assert!(g.admit(Timestamp::from_nanos(40 * MS)).is_admitted());
    }

    #[test]
    fn rejected_frames_do_not_move_the_window() {
        let g = governor();
        drop(g.admit(Timestamp::from_nanos(0)));
        assert!(!g.admit(Timestamp::from_nanos(30 * MS)).is_admitted());
        assert_eq!(g.last_admitted(), Some(Timestamp::from_nanos(0)));
        assert!(g.admit(Timestamp::from_nanos(40 * MS)).is_admitted());
    }

    #[test]
    fn in_flight_frame_blocks_admission() {
        let g = governor();
        let guard = g.admit(Timestamp::from_nanos(0));
        assert!(guard.is_admitted());
        assert!(matches!(g.admit(Timestamp::from_nanos(100 * MS)), Admission::Busy));
        drop(guard);
        assert!(g.admit(Timestamp::from_nanos(100 * MS)).is_admitted());
    }

    #[test]
    fn too_soon_releases_the_flight() {
        let g = governor();
        drop(g.admit(Timestamp::from_nanos(0)));
        assert!(matches!(g.admit(Timestamp::from_nanos(MS)), Admission::TooSoon));
        assert!(!g.is_busy());
    }

    #[test]
    fn out_of_order_timestamps_are_rejected() {
        let g = governor();
        drop(g.admit(Timestamp::from_nanos(500 * MS)));
        assert!(!g.admit(Timestamp::from_nanos(100 * MS)).is_admitted());
    }

    #[test]
    fn invalid_rates_keep_previous_interval() {
        let g = governor();
        for fps in [0.0, -3.0, f64::NAN, f64::INFINITY, MAX_FRAME_RATE + 1.0] {
            assert!(g.set_target_frame_rate(fps).is_err());
        }
        assert_eq!(g.interval(), Duration::from_millis(40));
        g.set_target_frame_rate(50.0).unwrap();
        assert_eq!(g.interval(), Duration::from_millis(20));
    }

    #[test]
    fn source_at_exactly_the_target_rate_is_always_admitted() {
        let g = FrameGovernor::new(24.0).unwrap();
        let admitted = (0..24u64)
            .filter(|n| g.admit(Timestamp::from_nanos(n * 1_000_000_000 / 24)).is_admitted())
            .count();
        assert_eq!(admitted, 24);
        assert_eq!(g.interval(), Duration::from_nanos(41_666_666));
    }

    #[test]
    fn reset_forgets_last_admission() {
        let g = governor();
        drop(g.admit(Timestamp::from_nanos(100 * MS)));
        g.reset();
        assert!(g.admit(Timestamp::from_nanos(MS)).is_admitted());
    }
}
