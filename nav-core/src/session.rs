//! Per-session bookkeeping: reference capture, delta chain, statistics.

use std::time::{Duration, Instant};

use nav_types::{TrackingMode, Vec3};
use uuid::Uuid;

/// One navigation run, from `start` to `stop`.
///
/// The session never stores absolute camera poses. It remembers the
/// reference position captured at start and the last tracked position it
/// applied; each incoming sample contributes only its delta from that
/// chain, so per-viewport pan offsets survive the whole run.
#[derive(Debug)]
pub struct NavigationSession {
    pub id: Uuid,
    pub mode: TrackingMode,
    /// Reference viewport camera position captured when the session began.
    reference: Vec3,
    last_applied: Option<Vec3>,
    update_count: u64,
    dropped_samples: u64,
    started_at: Instant,
    /// Set while the tracking connection is down mid-session.
    pub interrupted: bool,
}

impl NavigationSession {
    pub fn new(mode: TrackingMode, reference: Vec3) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            reference,
            last_applied: None,
            update_count: 0,
            dropped_samples: 0,
            started_at: Instant::now(),
            interrupted: false,
        }
    }

    /// Delta the cameras should move by for a sample at `position`. The
    /// first sample is measured against the start reference, later ones
    /// against the previous applied position.
    pub fn delta_for(&self, position: Vec3) -> Vec3 {
        position.sub(&self.last_applied.unwrap_or(self.reference))
    }

    pub fn record_applied(&mut self, position: Vec3) {
        self.last_applied = Some(position);
        self.update_count += 1;
    }

    pub fn record_dropped(&mut self, n: u64) {
        self.dropped_samples += n;
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Summary of the run, or `None` when not a single sample was applied.
    /// The zero-sample case carries no meaningful rate, so nothing is
    /// computed for it at all.
    pub fn stats(&self) -> Option<SessionStats> {
        if self.update_count == 0 {
            return None;
        }
        let elapsed = self.started_at.elapsed();
        let secs = elapsed.as_secs_f64();
        let average_hz = if secs > 0.0 {
            self.update_count as f64 / secs
        } else {
            0.0
        };
        Some(SessionStats {
            elapsed,
            update_count: self.update_count,
            average_hz,
            dropped_samples: self.dropped_samples,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub elapsed: Duration,
    pub update_count: u64,
    pub average_hz: f64,
    pub dropped_samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_delta_measures_from_reference() {
        let session = NavigationSession::new(TrackingMode::Circular, Vec3::new(10.0, 20.0, 30.0));
        let d = session.delta_for(Vec3::new(12.0, 19.0, 30.0));
        assert_relative_eq!(d.x, 2.0);
        assert_relative_eq!(d.y, -1.0);
        assert_relative_eq!(d.z, 0.0);
    }

    #[test]
    fn later_deltas_chain_from_last_applied() {
        let mut session = NavigationSession::new(TrackingMode::Linear, Vec3::zero());
        session.record_applied(Vec3::new(1.0, 0.0, 0.0));
        let d = session.delta_for(Vec3::new(4.0, 0.0, 0.0));
        assert_relative_eq!(d.x, 3.0);
    }

    #[test]
    fn stats_absent_without_applied_samples() {
        let session = NavigationSession::new(TrackingMode::Random, Vec3::zero());
        assert!(session.stats().is_none());
    }

    #[test]
    fn stats_count_updates_and_drops() {
        let mut session = NavigationSession::new(TrackingMode::Circular, Vec3::zero());
        for i in 0..5 {
            session.record_applied(Vec3::new(i as f64, 0.0, 0.0));
        }
        session.record_dropped(3);

        let stats = session.stats().unwrap();
        assert_eq!(stats.update_count, 5);
        assert_eq!(stats.dropped_samples, 3);
        assert!(stats.average_hz > 0.0);
    }
}
