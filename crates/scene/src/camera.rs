//! Camera for the frame uniforms.

use glam::{Mat4, Quat, Vec3};

/// A perspective camera.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Camera rotation
    pub rotation: Quat,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.0),
            rotation: Quat::IDENTITY,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the aspect ratio from a framebuffer size. Zero-sized extents are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        let forward = self.rotation * Vec3::NEG_Z;
        let target = self.position + forward;
        Mat4::look_at_rh(self.position, target, Vec3::Y)
    }

    /// Get the projection matrix (with Vulkan Y-flip).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // Flip Y for Vulkan coordinate system
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward.length_squared() > 0.0 {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, forward);
        }
    }
}

/// Keeps a [`Camera`] on a circle around a target, facing it.
#[derive(Clone, Debug)]
pub struct OrbitController {
    /// Angle around the Y axis in radians; zero looks down -Z.
    pub angle: f32,
    pub distance: f32,
    pub target: Vec3,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            angle: 0.0,
            distance: 2.0,
            target: Vec3::ZERO,
        }
    }
}

impl OrbitController {
    pub fn new(distance: f32) -> Self {
        Self {
            distance,
            ..Self::default()
        }
    }

    pub fn rotate(&mut self, delta: f32) {
        self.angle = (self.angle + delta).rem_euclid(std::f32::consts::TAU);
    }

    /// Moves `camera` to the orbit position and points it at the target.
    pub fn apply(&self, camera: &mut Camera) {
        let offset = Vec3::new(self.angle.sin(), 0.0, self.angle.cos()) * self.distance;
        camera.position = self.target + offset;
        camera.look_at(self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        assert!(camera.projection_matrix().y_axis.y < 0.0);
    }

    #[test]
    fn test_zero_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 400);
        assert_eq!(camera.aspect, 2.0);
        camera.set_viewport(0, 400);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn test_orbit_keeps_distance_and_faces_target() {
        let mut camera = Camera::default();
        let mut orbit = OrbitController::new(3.0);
        orbit.rotate(1.0);
        orbit.apply(&mut camera);

        assert!((camera.position.length() - 3.0).abs() < 1e-5);
        let facing = camera.rotation * Vec3::NEG_Z;
        assert!((facing + camera.position.normalize()).length() < 1e-4);
    }

    #[test]
    fn test_orbit_angle_wraps() {
        let mut orbit = OrbitController::default();
        orbit.rotate(-0.1);
        assert!(orbit.angle > 6.0 && orbit.angle < std::f32::consts::TAU);
    }

    #[test]
    fn test_target_projects_to_center() {
        let mut camera = Camera::default();
        OrbitController::new(2.0).apply(&mut camera);
        let clip = camera.view_projection_matrix() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
    }
}
