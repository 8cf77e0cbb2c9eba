//! Rigid placement transforms.
//!
//! Once a tool center is known, oriented content (a probe model, an
//! annotation frame) is placed there with a rotation taken from the
//! viewport orientation basis and a translation to the center. The basis
//! is validated before assembly; a sheared or scaled basis would silently
//! deform whatever gets placed with it.

use nav_types::Vec3;
use serde::Serialize;

use crate::error::{NavError, Result};

/// Unit-length tolerance for basis vectors.
const EPS_UNIT: f64 = 1e-4;
/// Pairwise-orthogonality tolerance for basis vectors.
const EPS_ORTHO: f64 = 1e-4;

/// Row-major homogeneous transform: rows 0..3 carry the basis vectors with
/// the translation in column 3, row 3 is `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RigidTransform {
    matrix: [[f64; 4]; 4],
}

impl RigidTransform {
    pub fn matrix(&self) -> [[f64; 4]; 4] {
        self.matrix
    }

    /// The 3x3 rotation block, rows = basis vectors.
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.matrix[0][3], self.matrix[1][3], self.matrix[2][3])
    }

    /// Determinant of the rotation block. +1 for a right-handed basis,
    /// -1 for a left-handed one.
    pub fn rotation_determinant(&self) -> f64 {
        let r = self.rotation();
        r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
    }

    /// Apply the transform to a point: rotate, then translate.
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let m = &self.matrix;
        Vec3::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
            m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
        )
    }
}

/// Build the placement transform for an oriented object at `translation`.
///
/// `basis` rows become the rotation rows. Each must be unit length and the
/// rows pairwise orthogonal, otherwise [`NavError::InvalidBasis`] names
/// the offending vector pair.
pub fn build_placement(basis: [Vec3; 3], translation: Vec3) -> Result<RigidTransform> {
    for (i, v) in basis.iter().enumerate() {
        let len = v.norm();
        if (len - 1.0).abs() > EPS_UNIT {
            return Err(NavError::InvalidBasis(format!(
                "basis vector {i} has length {len:.6}"
            )));
        }
    }
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        let dot = basis[i].dot(&basis[j]);
        if dot.abs() > EPS_ORTHO {
            return Err(NavError::InvalidBasis(format!(
                "basis vectors {i} and {j} are not orthogonal (dot = {dot:.6})"
            )));
        }
    }

    let [r0, r1, r2] = basis;
    let t = translation;
    Ok(RigidTransform {
        matrix: [
            [r0.x, r0.y, r0.z, t.x],
            [r1.x, r1.y, r1.z, t.y],
            [r2.x, r2.y, r2.z, t.z],
            [0.0, 0.0, 0.0, 1.0],
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const X: Vec3 = Vec3 {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };
    const Y: Vec3 = Vec3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    const Z: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    #[test]
    fn identity_basis_yields_identity_rotation() {
        let t = build_placement([X, Y, Z], Vec3::new(5.0, 10.0, 15.0)).unwrap();

        assert_eq!(t.rotation(), [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(t.translation(), Vec3::new(5.0, 10.0, 15.0));
        assert_relative_eq!(t.rotation_determinant(), 1.0);
        assert_eq!(t.matrix()[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn non_orthogonal_basis_is_rejected() {
        let skewed = Vec3::new(1.0, 0.2, 0.0).normalized().unwrap();
        let err = build_placement([X, skewed, Z], Vec3::zero()).unwrap_err();
        assert!(matches!(err, NavError::InvalidBasis(_)));
    }

    #[test]
    fn non_unit_basis_is_rejected() {
        let long = Vec3::new(0.0, 2.0, 0.0);
        let err = build_placement([X, long, Z], Vec3::zero()).unwrap_err();
        match err {
            NavError::InvalidBasis(reason) => assert!(reason.contains("length")),
            other => panic!("expected invalid basis, got {other:?}"),
        }
    }

    #[test]
    fn rotated_basis_moves_points_as_expected() {
        // Rows [Y, -X, Z] rotate by -90 degrees about Z: +X lands on -Y.
        let t = build_placement([Y, Vec3::new(-1.0, 0.0, 0.0), Z], Vec3::new(1.0, 2.0, 3.0))
            .unwrap();

        let moved = t.apply(X);
        assert_relative_eq!(moved.x, 1.0);
        assert_relative_eq!(moved.y, 1.0);
        assert_relative_eq!(moved.z, 3.0);
        assert_relative_eq!(t.rotation_determinant(), 1.0);
    }

    #[test]
    fn origin_maps_to_translation() {
        let t = build_placement([X, Y, Z], Vec3::new(-4.0, 0.5, 9.0)).unwrap();
        assert_eq!(t.apply(Vec3::zero()), Vec3::new(-4.0, 0.5, 9.0));
    }
}
