//! The model transformation driven by user input, and the orthographic
//! projection framing the model.

use brick_render::glam::{EulerRot, Mat4, Quat, Vec3};

/// Orbit and scale state on top of a model-specific default orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    default_rotation: Quat,
    default_scale: f32,
    pitch: f32,
    yaw: f32,
    scale: f32,
}

impl Transformation {
    pub fn new(default_rotation: Quat, default_scale: f32) -> Self {
        Self {
            default_rotation,
            default_scale,
            pitch: 0.0,
            yaw: 0.0,
            scale: default_scale,
        }
    }

    /// Accumulate an orbit drag: `dx` turns around the vertical axis,
    /// `dy` tilts toward or away from the camera. Radians.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw += dx;
        self.pitch += dy;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.max(f32::MIN_POSITIVE);
    }

    /// Restore the default orientation and scale.
    pub fn reset(&mut self) {
        self.pitch = 0.0;
        self.yaw = 0.0;
        self.scale = self.default_scale;
    }

    /// The model matrix: orbit rotation composed onto the default rotation,
    /// then uniform scale.
    pub fn matrix(&self) -> Mat4 {
        let orbit = Quat::from_euler(EulerRot::XYZ, self.pitch, self.yaw, 0.0);
        Mat4::from_quat(orbit * self.default_rotation) * Mat4::from_scale(Vec3::splat(self.scale))
    }
}

impl Default for Transformation {
    fn default() -> Self {
        Self::new(Quat::IDENTITY, 1.0)
    }
}

/// Reverse-Z orthographic projection around the model's bounding volume.
///
/// The near plane maps to depth 1 and the far plane to 0, matching the
/// Greater depth comparison and the 0.0 depth clear.
pub fn projection(view_box: f32, center: Vec3, aspect_ratio: f32) -> Mat4 {
    let r = view_box.max(f32::MIN_POSITIVE);
    let (sx, sy) = if aspect_ratio >= 1.0 {
        (r * aspect_ratio, r)
    } else {
        (r, r / aspect_ratio.max(f32::MIN_POSITIVE))
    };
    // Swapping the near and far planes flips the depth range.
    Mat4::orthographic_rh(-sx, sx, -sy, sy, r, -r) * Mat4::from_translation(-center)
}

/// Holds the current transformation, merges user input into it, and flags
/// when a new frame is needed.
#[derive(Debug)]
pub struct SceneController {
    transformation: Transformation,
    needs_redraw: bool,
}

impl Default for SceneController {
    fn default() -> Self {
        Self::new(Transformation::default())
    }
}

impl SceneController {
    pub fn new(transformation: Transformation) -> Self {
        Self {
            transformation,
            // Draw at least once with the initial state.
            needs_redraw: true,
        }
    }

    pub fn transformation(&self) -> &Transformation {
        &self.transformation
    }

    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.transformation.orbit(dx, dy);
        self.needs_redraw = true;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.transformation.set_scale(scale);
        self.needs_redraw = true;
    }

    pub fn reset(&mut self) {
        self.transformation.reset();
        self.needs_redraw = true;
    }

    /// True once per change; rendering consumes the flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use brick_render::glam::vec3;

    #[test]
    fn test_default_transformation_is_identity() {
        let transformation = Transformation::default();
        assert_eq!(Mat4::IDENTITY, transformation.matrix());
    }

    #[test]
    fn test_scale_composes_into_matrix() {
        let mut transformation = Transformation::default();
        transformation.set_scale(2.0);
        let p = transformation.matrix().transform_point3(vec3(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 2.0);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut transformation = Transformation::new(Quat::IDENTITY, 0.5);
        transformation.orbit(1.0, 0.5);
        transformation.set_scale(3.0);
        transformation.reset();
        assert_eq!(Transformation::new(Quat::IDENTITY, 0.5), transformation);
    }

    #[test]
    fn test_projection_reverse_z() {
        let center = vec3(5.0, -3.0, 2.0);
        let projection = projection(10.0, center, 1.0);

        // Near plane (toward the camera) lands on depth 1, the center on
        // 0.5, the far plane on 0.
        let near = projection.project_point3(center + vec3(0.0, 0.0, 10.0));
        assert_relative_eq!(near.z, 1.0);
        let middle = projection.project_point3(center);
        assert_relative_eq!(middle.z, 0.5);
        let far = projection.project_point3(center - vec3(0.0, 0.0, 10.0));
        assert_relative_eq!(far.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_centers_the_model() {
        let center = vec3(5.0, -3.0, 2.0);
        let projection = projection(10.0, center, 1.0);
        let origin = projection.project_point3(center);
        assert_relative_eq!(origin.x, 0.0);
        assert_relative_eq!(origin.y, 0.0);
    }

    #[test]
    fn test_projection_widens_with_aspect() {
        let projection = projection(10.0, Vec3::ZERO, 2.0);
        let right = projection.project_point3(vec3(20.0, 0.0, 0.0));
        assert_relative_eq!(right.x, 1.0);
        let top = projection.project_point3(vec3(0.0, 10.0, 0.0));
        assert_relative_eq!(top.y, 1.0);
    }

    #[test]
    fn test_orbit_accumulates() {
        let mut controller = SceneController::default();
        assert!(controller.take_redraw());
        assert!(!controller.take_redraw());

        controller.orbit(0.1, 0.2);
        assert!(controller.take_redraw());
        controller.orbit(0.1, 0.0);
        let matrix = controller.transformation().matrix();
        let expected = Quat::from_euler(EulerRot::XYZ, 0.2, 0.2, 0.0);
        assert_relative_eq!(
            matrix.transform_point3(vec3(0.0, 0.0, 1.0)).x,
            Mat4::from_quat(expected).transform_point3(vec3(0.0, 0.0, 1.0)).x
        );
    }
}
