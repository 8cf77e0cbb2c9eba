//! Three-plane intersection.
//!
//! Each MPR viewport shows one slice plane. Where the axial, sagittal and
//! coronal planes meet is the point the crosshair (and any tracked tool
//! placed "here") refers to. With plane i given as `n_i . p = d_i`, the
//! meeting point solves the 3x3 system with rows `n_0, n_1, n_2` and
//! right-hand side `d`. We solve it with Cramer's rule; a determinant near
//! zero means two planes are (anti)parallel and there is no single point.

use nav_types::Vec3;
use serde::Serialize;
use tracing::debug;

use crate::error::{NavError, Result};
use crate::viewport::ViewportPlane;

/// Determinant threshold below which the plane set counts as degenerate.
const EPS_DET: f64 = 1e-6;

/// Determinant of the 3x3 matrix with rows `r0, r1, r2`.
fn det3(r0: Vec3, r1: Vec3, r2: Vec3) -> f64 {
    r0.dot(&r1.cross(&r2))
}

/// Solve for the single point shared by all three slice planes.
///
/// Fails with [`NavError::DegenerateGeometry`] when the normals are not
/// linearly independent, i.e. at least two planes are parallel.
pub fn resolve_tool_center(planes: &[ViewportPlane; 3]) -> Result<Vec3> {
    let n0 = planes[0].normal;
    let n1 = planes[1].normal;
    let n2 = planes[2].normal;
    let d0 = n0.dot(&planes[0].point);
    let d1 = n1.dot(&planes[1].point);
    let d2 = n2.dot(&planes[2].point);

    let det = det3(n0, n1, n2);
    if det.abs() < EPS_DET {
        return Err(NavError::DegenerateGeometry { det, eps: EPS_DET });
    }

    // Cramer's rule: swap the right-hand side into one column at a time.
    let dx = det3(
        Vec3::new(d0, n0.y, n0.z),
        Vec3::new(d1, n1.y, n1.z),
        Vec3::new(d2, n2.y, n2.z),
    );
    let dy = det3(
        Vec3::new(n0.x, d0, n0.z),
        Vec3::new(n1.x, d1, n1.z),
        Vec3::new(n2.x, d2, n2.z),
    );
    let dz = det3(
        Vec3::new(n0.x, n0.y, d0),
        Vec3::new(n1.x, n1.y, d1),
        Vec3::new(n2.x, n2.y, d2),
    );

    Ok(Vec3::new(dx / det, dy / det, dz / det))
}

/// A successfully resolved crosshair point in patient coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCenter {
    pub position: Vec3,
    /// Wall-clock milliseconds when this center was resolved.
    pub resolved_at_ms: i64,
}

/// Keeps the most recent valid tool center across re-resolutions.
///
/// A degenerate plane set (mid camera rotation, say) leaves the previous
/// center in place rather than clearing it, so downstream consumers always
/// see the last point that actually existed.
#[derive(Debug, Default)]
pub struct CenterTracker {
    current: Option<ToolCenter>,
}

impl CenterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-resolve from `planes`. Returns `Ok(true)` when the center moved,
    /// `Ok(false)` when it stayed put, and the geometry error (previous
    /// center retained) when the planes do not meet in a point.
    pub fn update(&mut self, planes: &[ViewportPlane; 3]) -> Result<bool> {
        let position = resolve_tool_center(planes)?;
        let moved = self.current.map_or(true, |c| c.position != position);
        if moved {
            debug!(
                "tool center -> [{:.2}, {:.2}, {:.2}]",
                position.x, position.y, position.z
            );
        }
        self.current = Some(ToolCenter {
            position,
            resolved_at_ms: crate::now_ms(),
        });
        Ok(moved)
    }

    pub fn current(&self) -> Option<ToolCenter> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane(id: &str, normal: [f64; 3], point: [f64; 3]) -> ViewportPlane {
        ViewportPlane {
            viewport_id: id.to_string(),
            normal: normal.into(),
            point: point.into(),
        }
    }

    #[test]
    fn axis_aligned_planes_meet_at_shared_point() {
        let planes = [
            plane("axial", [0.0, 0.0, 1.0], [128.0, 128.0, 64.0]),
            plane("sagittal", [1.0, 0.0, 0.0], [128.0, 128.0, 64.0]),
            plane("coronal", [0.0, 1.0, 0.0], [128.0, 128.0, 64.0]),
        ];
        let center = resolve_tool_center(&planes).unwrap();
        assert_relative_eq!(center.x, 128.0);
        assert_relative_eq!(center.y, 128.0);
        assert_relative_eq!(center.z, 64.0);
    }

    #[test]
    fn oblique_planes_satisfy_all_three_equations() {
        let s = 1.0 / 2.0_f64.sqrt();
        let planes = [
            plane("a", [s, s, 0.0], [10.0, 0.0, 5.0]),
            plane("b", [0.0, s, s], [0.0, 4.0, 4.0]),
            plane("c", [s, 0.0, s], [2.0, -7.0, 0.0]),
        ];
        let center = resolve_tool_center(&planes).unwrap();
        for p in &planes {
            let lhs = p.normal.dot(&center);
            let rhs = p.normal.dot(&p.point);
            assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
        }
    }

    #[test]
    fn parallel_planes_are_degenerate() {
        let planes = [
            plane("a", [0.0, 0.0, 1.0], [0.0, 0.0, 10.0]),
            plane("b", [0.0, 0.0, 1.0], [0.0, 0.0, 20.0]),
            plane("c", [1.0, 0.0, 0.0], [5.0, 0.0, 0.0]),
        ];
        match resolve_tool_center(&planes) {
            Err(NavError::DegenerateGeometry { det, .. }) => assert!(det.abs() < 1e-6),
            other => panic!("expected degenerate geometry, got {other:?}"),
        }
    }

    #[test]
    fn antiparallel_normals_are_degenerate_too() {
        let planes = [
            plane("a", [0.0, 1.0, 0.0], [0.0, 3.0, 0.0]),
            plane("b", [0.0, -1.0, 0.0], [0.0, 9.0, 0.0]),
            plane("c", [0.0, 0.0, 1.0], [0.0, 0.0, 1.0]),
        ];
        assert!(matches!(
            resolve_tool_center(&planes),
            Err(NavError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn tracker_retains_center_through_degenerate_update() {
        let good = [
            plane("axial", [0.0, 0.0, 1.0], [1.0, 2.0, 3.0]),
            plane("sagittal", [1.0, 0.0, 0.0], [1.0, 2.0, 3.0]),
            plane("coronal", [0.0, 1.0, 0.0], [1.0, 2.0, 3.0]),
        ];
        let bad = [
            plane("axial", [0.0, 0.0, 1.0], [0.0, 0.0, 3.0]),
            plane("sagittal", [0.0, 0.0, 1.0], [0.0, 0.0, 9.0]),
            plane("coronal", [0.0, 1.0, 0.0], [0.0, 2.0, 0.0]),
        ];

        let mut tracker = CenterTracker::new();
        assert!(tracker.update(&good).unwrap());
        assert!(tracker.update(&bad).is_err());

        let kept = tracker.current().unwrap();
        assert_relative_eq!(kept.position.x, 1.0);
        assert_relative_eq!(kept.position.y, 2.0);
        assert_relative_eq!(kept.position.z, 3.0);
    }

    #[test]
    fn unchanged_planes_report_no_movement() {
        let planes = [
            plane("axial", [0.0, 0.0, 1.0], [5.0, 5.0, 5.0]),
            plane("sagittal", [1.0, 0.0, 0.0], [5.0, 5.0, 5.0]),
            plane("coronal", [0.0, 1.0, 0.0], [5.0, 5.0, 5.0]),
        ];
        let mut tracker = CenterTracker::new();
        assert!(tracker.update(&planes).unwrap());
        assert!(!tracker.update(&planes).unwrap());
    }
}
