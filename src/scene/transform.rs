//! Local transforms

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

/// Position, rotation and scale of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
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

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Create transform from position, rotation (euler angles in radians, XYZ order), and scale
    pub fn from_components(position: Vec3, rotation_euler: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: euler_to_quat(rotation_euler),
            scale,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Local matrix: translation * rotation * scale
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Rotation as XYZ euler angles in radians
    pub fn euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    pub fn set_euler(&mut self, euler: Vec3) {
        self.rotation = euler_to_quat(euler);
    }

    /// Get forward direction (local -Z in parent space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    /// Rotate around an axis in parent space
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        self.rotation = (Quat::from_axis_angle(axis.normalize(), angle) * self.rotation).normalize();
    }

    /// Orient local -Z toward `target`
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));
    }
}

fn euler_to_quat(euler: Vec3) -> Quat {
    Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z)
}

/// Inverse transpose of the upper 3x3 of a world matrix
pub fn normal_matrix(world: &Mat4) -> Mat3 {
    Mat3::from_mat4(*world).inverse().transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euler_round_trip() {
        let mut transform = Transform::default();
        transform.set_euler(Vec3::new(0.3, -0.2, 1.1));
        assert!(transform.euler().abs_diff_eq(Vec3::new(0.3, -0.2, 1.1), 1e-5));
    }

    #[test]
    fn test_look_at_faces_target() {
        let mut transform = Transform::from_position(Vec3::new(0.0, 0.0, 5.0));
        transform.look_at(Vec3::ZERO, Vec3::Y);
        assert!(transform.forward().abs_diff_eq(-Vec3::Z, 1e-5));
        assert!(transform.up().abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform::from_components(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2),
            Vec3::splat(2.0),
        );
        let point = transform.matrix().transform_point3(Vec3::X);
        assert!(point.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-5));
    }
}
