//! motion.rs — Synthetic tool motion
//!
//! Generates the paths a tracked instrument is exercised with during
//! viewer development:
//! - circular: orbit around the configured center with a slow axial bob
//! - linear: oscillation along one anatomical axis through the center
//! - random: bounded random walk, the jitter of a hand-held probe
//!
//! Every sample can carry Gaussian measurement noise on top, so the
//! viewer's smoothing and delta handling see realistic input. All
//! positions are patient-frame millimeters.

use nav_types::{TrackingMode, Vec3};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Slow superior-inferior bob layered on the circular orbit.
const BOB_RATE_RAD_S: f64 = 0.2;
const BOB_AMPLITUDE_MM: f64 = 20.0;

// ── Config ────────────────────────────────────────────────────────────────────

/// Which anatomical axis the linear mode sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearAxis {
    X,
    Y,
    #[default]
    Z,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Path center in patient coordinates (mm)
    pub center: [f64; 3],
    /// Circular orbit radius (mm)
    pub radius_mm: f64,
    /// Circular angular speed (rad/s)
    pub angular_speed_rad_s: f64,
    /// Axis swept by the linear mode
    pub linear_axis: LinearAxis,
    /// Linear oscillation amplitude (mm)
    pub linear_amplitude_mm: f64,
    /// Linear oscillation frequency (Hz)
    pub linear_freq_hz: f64,
    /// Random-walk step bound per update (mm)
    pub random_step_mm: f64,
    /// Random walk stays inside this radius around the center (mm)
    pub random_bound_mm: f64,
    /// Gaussian noise sigma added to every sample (mm, 0 disables)
    pub noise_mm: f64,
}

// ── Model ─────────────────────────────────────────────────────────────────────

/// Tool path state. One model serves the whole process; every connected
/// viewer sees the same tool at the same point of its path.
pub struct MotionModel {
    cfg: MotionConfig,
    mode: TrackingMode,
    center: Vec3,
    /// Path clock, reset on every mode change (seconds)
    t: f64,
    /// Random-walk offset from the center
    walk: Vec3,
    noise: Option<Normal<f64>>,
}

impl MotionModel {
    pub fn new(cfg: &MotionConfig) -> Self {
        // Invalid sigma (negative, NaN) silently disables noise rather
        // than killing the connection task.
        let noise = Normal::new(0.0, cfg.noise_mm)
            .ok()
            .filter(|_| cfg.noise_mm > 0.0);
        Self {
            cfg: cfg.clone(),
            mode: TrackingMode::default(),
            center: cfg.center.into(),
            t: 0.0,
            walk: Vec3::zero(),
            noise,
        }
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Switch path family. Starts a fresh pass: the path clock and walk
    /// reset, the center stays wherever the viewer put it.
    pub fn set_mode(&mut self, mode: TrackingMode) {
        self.mode = mode;
        self.t = 0.0;
        self.walk = Vec3::zero();
    }

    pub fn set_center(&mut self, center: Vec3) {
        self.center = center;
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Advance by `dt` seconds and return the next tool position.
    pub fn advance(&mut self, dt: f64) -> Vec3 {
        let ideal = match self.mode {
            TrackingMode::Circular => {
                let angle = self.t * self.cfg.angular_speed_rad_s;
                Vec3::new(
                    self.center.x + self.cfg.radius_mm * angle.cos(),
                    self.center.y + self.cfg.radius_mm * angle.sin(),
                    self.center.z + (self.t * BOB_RATE_RAD_S).sin() * BOB_AMPLITUDE_MM,
                )
            }
            TrackingMode::Linear => {
                let offset = self.cfg.linear_amplitude_mm
                    * (std::f64::consts::TAU * self.cfg.linear_freq_hz * self.t).sin();
                let mut p = self.center;
                match self.cfg.linear_axis {
                    LinearAxis::X => p.x += offset,
                    LinearAxis::Y => p.y += offset,
                    LinearAxis::Z => p.z += offset,
                }
                p
            }
            TrackingMode::Random => {
                let mut rng = rand::thread_rng();
                let step = self.cfg.random_step_mm;
                self.walk = self.walk.add(&Vec3::new(
                    rng.gen_range(-step..=step),
                    rng.gen_range(-step..=step),
                    rng.gen_range(-step..=step),
                ));
                // Clamp back onto the bounding sphere if the walk escaped.
                let r = self.walk.norm();
                if r > self.cfg.random_bound_mm {
                    self.walk = self.walk.scale(self.cfg.random_bound_mm / r);
                }
                self.center.add(&self.walk)
            }
        };
        self.t += dt;
        match self.noise {
            Some(noise) => {
                let mut rng = rand::thread_rng();
                Vec3::new(
                    ideal.x + noise.sample(&mut rng),
                    ideal.y + noise.sample(&mut rng),
                    ideal.z + noise.sample(&mut rng),
                )
            }
            None => ideal,
        }
    }
}
