//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Shape of the viewing volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lens {
    /// Vertical field of view in radians
    Perspective { fov_y: f32 },
    /// Half the visible height in world units
    Orthographic { half_height: f32 },
}

/// Lens plus the aspect ratio and depth range it is viewed through
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub lens: Lens,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self::perspective(45.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            lens: Lens::Perspective {
                fov_y: fov_y_degrees.to_radians(),
            },
            aspect,
            near,
            far,
        }
    }

    /// Centered volume `width` x `height` world units across
    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Self {
            lens: Lens::Orthographic {
                half_height: height / 2.0,
            },
            aspect: width / height,
            near,
            far,
        }
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self.lens, Lens::Perspective { .. })
    }

    /// Right-handed clip matrix with a 0..1 depth range
    pub fn matrix(&self) -> Mat4 {
        match self.lens {
            Lens::Perspective { fov_y } => {
                Mat4::perspective_rh(fov_y, self.aspect, self.near, self.far)
            }
            Lens::Orthographic { half_height } => {
                let half_width = half_height * self.aspect;
                Mat4::orthographic_rh(
                    -half_width,
                    half_width,
                    -half_height,
                    half_height,
                    self.near,
                    self.far,
                )
            }
        }
    }
}

/// Camera with cached view and projection matrices
///
/// Controllers write `position`, `target` and `up` directly; `update`
/// recomputes the view matrix from them. The projection matrix is only
/// recomputed by `set_projection`, `set_fov` and `resize`.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    projection: Projection,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    projection_revision: u64,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO)
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self::with_projection(position, target, Projection::default())
    }

    pub fn with_projection(position: Vec3, target: Vec3, projection: Projection) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection,
            view_matrix: Mat4::look_at_rh(position, target, Vec3::Y),
            projection_matrix: projection.matrix(),
            projection_revision: 0,
        }
    }

    /// Recompute the view matrix; the projection is left untouched
    pub fn update(&mut self) {
        self.view_matrix = Mat4::look_at_rh(self.position, self.target, self.up);
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.refresh_projection();
    }

    /// Change the vertical field of view (radians); ignored for orthographic cameras
    pub fn set_fov(&mut self, fov: f32) {
        if let Lens::Perspective { fov_y } = &mut self.projection.lens {
            *fov_y = fov;
            self.refresh_projection();
        }
    }

    /// Update the aspect ratio after a viewport resize
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        // Orthographic lenses keep their height and widen with the aspect
        self.projection.aspect = width as f32 / height as f32;
        self.refresh_projection();
    }

    fn refresh_projection(&mut self) {
        self.projection_matrix = self.projection.matrix();
        self.projection_revision += 1;
    }

    /// Number of times the projection matrix was recomputed
    pub fn projection_revision(&self) -> u64 {
        self.projection_revision
    }

    /// Cached view matrix as of the last `update`
    pub fn view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize()
    }

    /// Build camera uniform data for shaders
    pub fn uniform_data(&self) -> CameraUniformData {
        let view = self.view_matrix;
        let proj = self.projection_matrix;
        CameraUniformData {
            view,
            proj,
            view_proj: proj * view,
            position: self.position.extend(1.0),
            near_far: Vec4::new(self.projection.near, self.projection.far, 0.0, 0.0),
        }
    }
}

/// Camera uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub position: Vec4,
    pub near_far: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_leaves_projection_alone() {
        let mut camera = Camera::default();
        let projection = camera.projection_matrix();
        let view = camera.view_matrix();

        camera.position = Vec3::new(3.0, 1.0, 3.0);
        assert_eq!(camera.view_matrix(), view);
        camera.update();
        assert_ne!(camera.view_matrix(), view);
        assert_eq!(camera.projection_matrix(), projection);
        assert_eq!(camera.projection_revision(), 0);
    }

    #[test]
    fn test_resize_and_fov_recompute_projection() {
        let mut camera = Camera::default();
        camera.resize(800, 800);
        assert_eq!(camera.projection_revision(), 1);
        assert!(camera.projection().is_perspective());
        assert_eq!(camera.projection().aspect, 1.0);
        camera.set_fov(1.0);
        assert_eq!(camera.projection().lens, Lens::Perspective { fov_y: 1.0 });
        assert_eq!(camera.projection_revision(), 2);
        camera.resize(0, 10);
        assert_eq!(camera.projection_revision(), 2);
    }

    #[test]
    fn test_orthographic_resize_keeps_height() {
        let mut camera =
            Camera::with_projection(Vec3::Z, Vec3::ZERO, Projection::orthographic(2.0, 2.0, 0.1, 10.0));
        camera.resize(200, 100);
        assert_eq!(camera.projection().lens, Lens::Orthographic { half_height: 1.0 });
        assert_eq!(camera.projection().aspect, 2.0);

        let corner = camera.projection_matrix() * Vec4::new(2.0, 1.0, -1.0, 1.0);
        assert!((corner.x - 1.0).abs() < 1e-6 && (corner.y - 1.0).abs() < 1e-6);

        let revision = camera.projection_revision();
        camera.set_fov(0.5);
        assert_eq!(camera.projection_revision(), revision);
    }
}
