// SPDX-License-Identifier: CEPL-1.0
use std::f32::consts::{FRAC_PI_2, TAU};

use bitflags::bitflags;
use glam::{Mat4, Vec3};

pub use glam;

/// Row-major 4x4, the layout the uniform block expects.
pub type RowMajor = [[f32; 4]; 4];

/// Just short of straight up/down so the view basis never degenerates.
pub const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.001;

bitflags! {
    /// Movement keys held this frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Movement: u8 {
        const FORWARD = 1 << 0;
        const BACK    = 1 << 1;
        const LEFT    = 1 << 2;
        const RIGHT   = 1 << 3;
        const UP      = 1 << 4;
        const DOWN    = 1 << 5;
    }
}

/// Free-fly camera. Yaw 0 / pitch 0 looks down -Z with +Y up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Radians, kept in `[0, TAU)`.
    pub yaw: f32,
    /// Radians, clamped to `±PITCH_LIMIT`.
    pub pitch: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// World units per second.
    pub speed: f32,
    /// Radians per pixel of mouse motion.
    pub sensitivity: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            yaw: 0.0,
            pitch: 0.0,
            fov_y: 90f32.to_radians(),
            near: 0.01,
            far: 1000.0,
            speed: 2.5,
            sensitivity: 0.002,
        }
    }
}

impl Camera {
    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(cp * sy, sp, -cp * cy)
    }

    pub fn right(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        Vec3::new(cy, 0.0, sy)
    }

    /// Mouse delta in pixels; +dy (down on screen) pitches down.
    pub fn look(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw + dx * self.sensitivity).rem_euclid(TAU);
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Walks on the horizontal plane; UP/DOWN move along world Y. Diagonals
    /// are not faster than straight lines.
    pub fn apply(&mut self, held: Movement, dt: f32) {
        let (sy, cy) = self.yaw.sin_cos();
        let flat_forward = Vec3::new(sy, 0.0, -cy);
        let right = self.right();

        let mut dir = Vec3::ZERO;
        if held.contains(Movement::FORWARD) {
            dir += flat_forward;
        }
        if held.contains(Movement::BACK) {
            dir -= flat_forward;
        }
        if held.contains(Movement::RIGHT) {
            dir += right;
        }
        if held.contains(Movement::LEFT) {
            dir -= right;
        }
        if held.contains(Movement::UP) {
            dir += Vec3::Y;
        }
        if held.contains(Movement::DOWN) {
            dir -= Vec3::Y;
        }

        if let Some(dir) = dir.try_normalize() {
            self.position += dir * self.speed * dt;
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Right-handed, depth in [0, 1], Y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_rows(&self) -> RowMajor {
        to_rows(self.view())
    }

    pub fn proj_rows(&self, aspect: f32) -> RowMajor {
        to_rows(self.projection(aspect))
    }
}

/// glam is column-major; transpose so each inner array is a row.
pub fn to_rows(m: Mat4) -> RowMajor {
    m.transpose().to_cols_array_2d()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn default_looks_down_negative_z() {
        let cam = Camera::default();
        assert!(close(cam.forward(), Vec3::NEG_Z));
        assert!(close(cam.right(), Vec3::X));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = Camera::default();
        cam.look(0.0, -1.0e6);
        assert_eq!(cam.pitch, PITCH_LIMIT);
        cam.look(0.0, 1.0e6);
        assert_eq!(cam.pitch, -PITCH_LIMIT);
        assert!(cam.forward().is_finite());
    }

    #[test]
    fn yaw_wraps() {
        let mut cam = Camera {
            sensitivity: 1.0,
            ..Camera::default()
        };
        cam.look(-FRAC_PI_2, 0.0);
        assert!((cam.yaw - (TAU - FRAC_PI_2)).abs() < 1e-5);
        cam.look(TAU, 0.0);
        assert!(cam.yaw >= 0.0 && cam.yaw < TAU);
        // quarter turn left now faces -X
        assert!(close(cam.forward(), Vec3::NEG_X));
    }

    #[test]
    fn diagonal_moves_at_walking_speed() {
        let mut cam = Camera {
            position: Vec3::ZERO,
            speed: 2.0,
            ..Camera::default()
        };
        cam.apply(Movement::FORWARD | Movement::RIGHT, 0.5);
        assert!((cam.position.length() - 1.0).abs() < 1e-5);
        assert!(cam.position.x > 0.0 && cam.position.z < 0.0);
    }

    #[test]
    fn opposing_keys_cancel() {
        let mut cam = Camera::default();
        let start = cam.position;
        cam.apply(Movement::FORWARD | Movement::BACK, 1.0);
        cam.apply(Movement::LEFT | Movement::RIGHT, 1.0);
        cam.apply(Movement::empty(), 1.0);
        assert_eq!(cam.position, start);
    }

    #[test]
    fn looking_up_does_not_fly() {
        let mut cam = Camera {
            position: Vec3::ZERO,
            pitch: 1.0,
            ..Camera::default()
        };
        cam.apply(Movement::FORWARD, 1.0);
        assert_eq!(cam.position.y, 0.0);
    }

    #[test]
    fn view_moves_eye_to_origin() {
        let cam = Camera {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Camera::default()
        };
        let eye = cam.view() * cam.position.extend(1.0);
        assert!(close(eye.truncate(), Vec3::ZERO));

        // row-major: translation sits in the last column of each row
        let rows = cam.view_rows();
        assert!((rows[0][3] + 1.0).abs() < 1e-5);
        assert!((rows[1][3] + 2.0).abs() < 1e-5);
        assert!((rows[2][3] + 3.0).abs() < 1e-5);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn projection_flips_y_and_maps_depth_to_unit_range() {
        let cam = Camera::default();
        let proj = cam.projection(16.0 / 9.0);
        assert!(proj.y_axis.y < 0.0);

        let near = proj * Vec4::new(0.0, 0.0, -cam.near, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -cam.far, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);

        // a point above the axis lands in the upper half of Vulkan clip space (negative y)
        let up = proj * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn rows_are_the_transpose_of_columns() {
        let m = Mat4::from_cols_array_2d(&[
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
        ]);
        let rows = to_rows(m);
        assert_eq!(rows[0], [1.0, 5.0, 9.0, 13.0]);
        assert_eq!(rows[3], [4.0, 8.0, 12.0, 16.0]);
    }
}
