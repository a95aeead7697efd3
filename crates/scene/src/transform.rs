//! Instance transforms.
//!
//! # Example
//!
//! ```
//! use renderer_scene::Transform;
//! use glam::Vec3;
//!
//! let t = Transform::from_position(Vec3::new(1.0, 0.0, -2.0)).with_scale(Vec3::splat(0.5));
//! let origin = t.matrix().transform_point3(Vec3::ZERO);
//! assert!((origin - Vec3::new(1.0, 0.0, -2.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale of one drawable instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Identity rotation and scale at `position`.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Model matrix: scale, then rotate, then translate.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Get the forward direction vector.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }
}

impl From<Vec3> for Transform {
    fn from(position: Vec3) -> Self {
        Self::from_position(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < EPSILON
    }

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_transform_builder() {
        let t = Transform::new()
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::splat(2.0));

        assert_eq!(t.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t.scale, Vec3::splat(2.0));
    }

    #[test]
    fn test_matrix_applies_scale_before_translation() {
        let t = Transform::from_position(Vec3::new(10.0, 0.0, 0.0)).with_scale(Vec3::splat(2.0));
        let p = t.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx_eq_vec3(p, Vec3::new(12.0, 0.0, 0.0)));
    }

    #[test]
    fn test_rotation_about_z() {
        let t = Transform::new().with_rotation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let p = t.matrix().transform_point3(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::Y));
        assert!(approx_eq_vec3(t.forward(), Vec3::NEG_Z));
    }
}
