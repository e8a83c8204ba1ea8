//! Camera and view management.

use glam::{Mat4, Vec3};
use vireo_core::UniformFrameData;

/// Perspective camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Create a camera looking from `position` at `target`.
    pub fn new(position: Vec3, target: Vec3, up: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up,
            fov,
            aspect,
            ..Self::default()
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Track the aspect ratio of a drawable. Zero-sized extents are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Circle `target` at `radius` in the XZ plane, `angle` radians from +Z.
    pub fn orbit(&mut self, target: Vec3, radius: f32, height: f32, angle: f32) {
        self.position = target + Vec3::new(radius * angle.sin(), height, radius * angle.cos());
        self.look_at(target);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// Right-handed perspective with 0..1 depth and Y pointing down in
    /// clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Uniform block for drawing an object with `model`.
    pub fn uniforms(&self, model: Mat4) -> UniformFrameData {
        UniformFrameData::from_matrices(model, self.view_matrix(), self.projection_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn look_at_normalizes_direction() {
        let camera = Camera::new(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            1.0,
        );
        assert_relative_eq!(camera.direction.length(), 1.0);
        assert_relative_eq!(camera.direction.z, -1.0);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * Vec3::new(0.0, 1.0, 0.0).extend(1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn degenerate_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
        camera.set_viewport(0, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
    }

    #[test]
    fn orbit_keeps_target_centered() {
        let mut camera = Camera::default();
        camera.orbit(Vec3::ZERO, 4.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(camera.position.x, 4.0, epsilon = 1e-5);
        assert_relative_eq!(camera.direction.x, -1.0, epsilon = 1e-5);
        let uniforms = camera.uniforms(Mat4::IDENTITY);
        assert_relative_eq!(uniforms.model[0][0], 1.0);
    }
}
