//! Viewport camera seam.
//!
//! The controller only ever sees viewports through the [`Viewport`] trait:
//! read the current camera, shift it by a delta. [`SharedViewport`] is the
//! reference implementation backed by a shared pose that the embedding
//! viewer reads from its render loop.

use std::sync::{Arc, RwLock};

use nav_types::Vec3;
use serde::{Deserialize, Serialize};

/// Camera state of one MPR viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraPose {
    pub position: Vec3,
    pub focal_point: Vec3,
    pub view_up: Vec3,
    pub view_plane_normal: Vec3,
}

impl CameraPose {
    /// Axis-aligned camera looking down -Z at the origin. Handy as a
    /// starting pose before the viewer has loaded a volume.
    pub fn axial() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 300.0),
            focal_point: Vec3::zero(),
            view_up: Vec3::new(0.0, 1.0, 0.0),
            view_plane_normal: Vec3::new(0.0, 0.0, 1.0),
        }
    }

    /// Translate position and focal point together, leaving orientation
    /// and the pan offset between them untouched.
    pub fn shifted(&self, delta: Vec3) -> Self {
        Self {
            position: self.position.add(&delta),
            focal_point: self.focal_point.add(&delta),
            ..*self
        }
    }

    /// Right-handed orthonormal rows [right, up, normal] for this camera,
    /// ready to feed a placement transform. `None` when up and normal are
    /// not orthogonal unit vectors (mid-interaction, typically).
    pub fn orientation_basis(&self) -> Option<[Vec3; 3]> {
        let up = self.view_up.normalized()?;
        let normal = self.view_plane_normal.normalized()?;
        let right = up.cross(&normal).normalized()?;
        Some([right, up, normal])
    }
}

/// The slice plane a viewport currently shows, in patient coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportPlane {
    pub viewport_id: String,
    /// Unit normal of the slice plane.
    pub normal: Vec3,
    /// Any point on the plane, typically the camera focal point.
    pub point: Vec3,
}

impl ViewportPlane {
    pub fn from_camera(viewport_id: impl Into<String>, camera: &CameraPose) -> Self {
        Self {
            viewport_id: viewport_id.into(),
            normal: camera.view_plane_normal,
            point: camera.focal_point,
        }
    }
}

/// What the controller needs from a viewport. Implementations must be
/// callable from the controller task, hence `Send + Sync`.
pub trait Viewport: Send + Sync {
    fn id(&self) -> &str;

    fn camera(&self) -> CameraPose;

    /// Shift the camera by `delta`, preserving the viewport's own
    /// orientation and pan offset.
    fn apply_delta(&self, delta: Vec3);
}

/// A viewport whose camera lives behind a shared lock. Clones observe the
/// same pose, so the embedder keeps one clone for rendering while the
/// controller drives another.
#[derive(Clone)]
pub struct SharedViewport {
    id: String,
    camera: Arc<RwLock<CameraPose>>,
}

impl SharedViewport {
    pub fn new(id: impl Into<String>, camera: CameraPose) -> Self {
        Self {
            id: id.into(),
            camera: Arc::new(RwLock::new(camera)),
        }
    }

    /// Replace the pose wholesale, e.g. after a manual camera interaction.
    pub fn set_camera(&self, camera: CameraPose) {
        match self.camera.write() {
            Ok(mut guard) => *guard = camera,
            Err(poisoned) => *poisoned.into_inner() = camera,
        }
    }
}

impl Viewport for SharedViewport {
    fn id(&self) -> &str {
        &self.id
    }

    fn camera(&self) -> CameraPose {
        match self.camera.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn apply_delta(&self, delta: Vec3) {
        let mut guard = match self.camera.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let shifted = guard.shifted(delta);
        *guard = shifted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn shift_preserves_pan_offset() {
        let vp = SharedViewport::new(
            "sagittal",
            CameraPose {
                position: Vec3::new(300.0, 10.0, 20.0),
                focal_point: Vec3::new(0.0, 10.0, 20.0),
                view_up: Vec3::new(0.0, 0.0, 1.0),
                view_plane_normal: Vec3::new(1.0, 0.0, 0.0),
            },
        );

        vp.apply_delta(Vec3::new(5.0, -3.0, 2.5));

        let cam = vp.camera();
        assert_relative_eq!(cam.position.x, 305.0);
        assert_relative_eq!(cam.focal_point.y, 7.0);
        // Offset between position and focal point is untouched.
        let offset = cam.position.sub(&cam.focal_point);
        assert_relative_eq!(offset.x, 300.0);
        assert_relative_eq!(offset.y, 0.0);
        assert_relative_eq!(offset.z, 0.0);
        // As is orientation.
        assert_eq!(cam.view_plane_normal, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn clones_share_one_camera() {
        let vp = SharedViewport::new("axial", CameraPose::axial());
        let render_side = vp.clone();

        vp.apply_delta(Vec3::new(0.0, 0.0, -50.0));
        assert_relative_eq!(render_side.camera().position.z, 250.0);
    }

    #[test]
    fn plane_from_camera_uses_focal_point() {
        let cam = CameraPose::axial();
        let plane = ViewportPlane::from_camera("axial", &cam);
        assert_eq!(plane.normal, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(plane.point, Vec3::zero());
    }
}
