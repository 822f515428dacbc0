//! 4x4 matrix helpers for the 2D transform pipeline.
//!
//! Matrices are column-major (`m[col][row]`), matching what WGPU expects in
//! uniform buffers, so a [`Mat4`] can be memcpy'd into a `TransformUniform`
//! without transposition.

use crate::utils::TransformUniform;

const DET_EPSILON: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [[f32; 4]; 4]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub fn from_translation(dx: f32, dy: f32) -> Self {
        let mut m = Mat4::IDENTITY;
        m.0[3][0] = dx;
        m.0[3][1] = dy;
        m
    }

    pub fn from_scale(sx: f32, sy: f32) -> Self {
        let mut m = Mat4::IDENTITY;
        m.0[0][0] = sx;
        m.0[1][1] = sy;
        m
    }

    /// Rotation about +z. Positive angles rotate counter-clockwise in a
    /// y-up space; screen space is y-down, so on screen they read clockwise.
    pub fn from_rotation(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        let mut m = Mat4::IDENTITY;
        m.0[0][0] = cos;
        m.0[0][1] = sin;
        m.0[1][0] = -sin;
        m.0[1][1] = cos;
        m
    }

    /// Orthographic projection for a pixel-space viewport with the origin at
    /// the top-left and y growing downward. Maps x to [-1, 1] and y to
    /// [1, -1], so the viewport center lands on NDC (0, 0).
    pub fn orthographic(width: f32, height: f32) -> Self {
        let mut m = Mat4::IDENTITY;
        m.0[0][0] = 2.0 / width;
        m.0[1][1] = -2.0 / height;
        m.0[3][0] = -1.0;
        m.0[3][1] = 1.0;
        m
    }

    pub fn mul(a: &Mat4, b: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += a.0[k][row] * b.0[col][k];
                }
                out[col][row] = sum;
            }
        }
        Mat4(out)
    }

    /// Applies the matrix to a 2D point at z = 0, w = 1. The transforms this
    /// engine builds are affine, so no perspective divide is performed.
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        (
            m[0][0] * x + m[1][0] * y + m[3][0],
            m[0][1] * x + m[1][1] * y + m[3][1],
        )
    }

    /// Full 4x4 inverse by cofactor expansion. Returns `None` when the
    /// determinant is too close to zero to invert reliably.
    ///
    /// The sub-determinant formulation is layout-agnostic: inversion commutes
    /// with transposition, so applying it to the raw array yields the right
    /// answer for column-major storage as well.
    pub fn invert(&self) -> Option<Mat4> {
        let a = &self.0;

        let s0 = a[0][0] * a[1][1] - a[1][0] * a[0][1];
        let s1 = a[0][0] * a[1][2] - a[1][0] * a[0][2];
        let s2 = a[0][0] * a[1][3] - a[1][0] * a[0][3];
        let s3 = a[0][1] * a[1][2] - a[1][1] * a[0][2];
        let s4 = a[0][1] * a[1][3] - a[1][1] * a[0][3];
        let s5 = a[0][2] * a[1][3] - a[1][2] * a[0][3];

        let c5 = a[2][2] * a[3][3] - a[3][2] * a[2][3];
        let c4 = a[2][1] * a[3][3] - a[3][1] * a[2][3];
        let c3 = a[2][1] * a[3][2] - a[3][1] * a[2][2];
        let c2 = a[2][0] * a[3][3] - a[3][0] * a[2][3];
        let c1 = a[2][0] * a[3][2] - a[3][0] * a[2][2];
        let c0 = a[2][0] * a[3][1] - a[3][0] * a[2][1];

        let det = s0 * c5 - s1 * c4 + s2 * c3 + s3 * c2 - s4 * c1 + s5 * c0;
        if det.abs() < DET_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let mut out = [[0.0f32; 4]; 4];

        out[0][0] = (a[1][1] * c5 - a[1][2] * c4 + a[1][3] * c3) * inv_det;
        out[0][1] = (-a[0][1] * c5 + a[0][2] * c4 - a[0][3] * c3) * inv_det;
        out[0][2] = (a[3][1] * s5 - a[3][2] * s4 + a[3][3] * s3) * inv_det;
        out[0][3] = (-a[2][1] * s5 + a[2][2] * s4 - a[2][3] * s3) * inv_det;

        out[1][0] = (-a[1][0] * c5 + a[1][2] * c2 - a[1][3] * c1) * inv_det;
        out[1][1] = (a[0][0] * c5 - a[0][2] * c2 + a[0][3] * c1) * inv_det;
        out[1][2] = (-a[3][0] * s5 + a[3][2] * s2 - a[3][3] * s1) * inv_det;
        out[1][3] = (a[2][0] * s5 - a[2][2] * s2 + a[2][3] * s1) * inv_det;

        out[2][0] = (a[1][0] * c4 - a[1][1] * c2 + a[1][3] * c0) * inv_det;
        out[2][1] = (-a[0][0] * c4 + a[0][1] * c2 - a[0][3] * c0) * inv_det;
        out[2][2] = (a[3][0] * s4 - a[3][1] * s2 + a[3][3] * s0) * inv_det;
        out[2][3] = (-a[2][0] * s4 + a[2][1] * s2 - a[2][3] * s0) * inv_det;

        out[3][0] = (-a[1][0] * c3 + a[1][1] * c1 - a[1][2] * c0) * inv_det;
        out[3][1] = (a[0][0] * c3 - a[0][1] * c1 + a[0][2] * c0) * inv_det;
        out[3][2] = (-a[3][0] * s3 + a[3][1] * s1 - a[3][2] * s0) * inv_det;
        out[3][3] = (a[2][0] * s3 - a[2][1] * s1 + a[2][2] * s0) * inv_det;

        Some(Mat4(out))
    }

    pub fn to_uniform(&self) -> TransformUniform {
        TransformUniform { transform: self.0 }
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Mat4::IDENTITY
    }
}
