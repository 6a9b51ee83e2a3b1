//! Camera controller system
//!
//! Controllers turn per-frame input into camera position and target:
//! - Orbit: spherical coordinates around a target point
//! - Arcball: free rotation around a center by dragging on a virtual sphere
//! - FirstPerson: WASD movement along the view direction, mouse look
//!
//! Every controller eases its current state toward a target state with
//! `current += (target - current) * damping`. A damping of 1.0 snaps.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_6, PI};

use glam::{Quat, Vec2, Vec3};

use super::Camera;

/// Elevation and pitch stay strictly inside (-PI/2, PI/2) by this margin
pub const ANGLE_EPSILON: f32 = 0.01;

/// Largest elevation or pitch any controller accepts
pub const MAX_ELEVATION: f32 = FRAC_PI_2 - ANGLE_EPSILON;

fn clamp_elevation(value: f32, min: f32, max: f32) -> f32 {
    value.clamp(min.max(-MAX_ELEVATION), max.min(MAX_ELEVATION))
}

fn ease(current: f32, target: f32, damping: f32) -> f32 {
    current + (target - current) * damping
}

/// Input state for camera controllers
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (WASD, QE for up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Sprint modifier (shift)
    pub sprint: bool,

    /// Pointer delta since last frame (in pixels)
    pub pointer_delta: Vec2,

    /// Pointer position in normalized device coordinates, y up
    pub pointer_ndc: Vec2,

    /// Scroll delta (positive = scroll up)
    pub scroll_delta: f32,

    /// Whether a drag is in progress (e.g. left button held)
    pub dragging: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.pointer_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    fn movement(&self, forward: Vec3, right: Vec3) -> Vec3 {
        let mut direction = Vec3::ZERO;
        if self.forward {
            direction += forward;
        }
        if self.backward {
            direction -= forward;
        }
        if self.right {
            direction += right;
        }
        if self.left {
            direction -= right;
        }
        if self.up {
            direction += Vec3::Y;
        }
        if self.down {
            direction -= Vec3::Y;
        }
        direction.normalize_or_zero()
    }
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Advance the controller and write the result into `camera`
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;

    /// Reset the controller to default state
    fn reset(&mut self);
}

/// Spherical coordinates around a target point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spherical {
    pub azimuth: f32,
    pub elevation: f32,
    pub distance: f32,
}

impl Spherical {
    /// Offset from the center, y up
    pub fn to_cartesian(&self) -> Vec3 {
        Vec3::new(
            self.distance * self.elevation.cos() * self.azimuth.cos(),
            self.distance * self.elevation.sin(),
            self.distance * self.elevation.cos() * self.azimuth.sin(),
        )
    }

    pub fn from_cartesian(offset: Vec3) -> Self {
        let distance = offset.length();
        if distance <= f32::EPSILON {
            return Self {
                azimuth: 0.0,
                elevation: 0.0,
                distance: 0.0,
            };
        }
        Self {
            azimuth: offset.z.atan2(offset.x),
            elevation: (offset.y / distance).clamp(-1.0, 1.0).asin(),
            distance,
        }
    }
}

/// Orbit camera controller
///
/// - Drag: orbit around the target
/// - Scroll: zoom
/// - WASD: pan the target point
pub struct OrbitController {
    pub target: Vec3,
    /// Where the camera currently is
    pub current: Spherical,
    /// Where the camera is easing toward
    pub goal: Spherical,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Orbit sensitivity (radians per pixel)
    pub orbit_sensitivity: f32,
    /// Zoom factor per scroll unit
    pub zoom_factor: f32,
    pub pan_speed: f32,
    /// Fraction of the remaining distance covered per update, in (0, 1]
    pub damping: f32,
}

impl Default for OrbitController {
    fn default() -> Self {
        let start = Spherical {
            azimuth: 0.0,
            elevation: FRAC_PI_6,
            distance: 10.0,
        };
        Self {
            target: Vec3::ZERO,
            current: start,
            goal: start,
            min_distance: 1.0,
            max_distance: 100.0,
            min_elevation: -MAX_ELEVATION,
            max_elevation: MAX_ELEVATION,
            orbit_sensitivity: 0.005,
            zoom_factor: 1.1,
            pan_speed: 5.0,
            damping: 0.2,
        }
    }
}

impl OrbitController {
    pub fn new(target: Vec3, distance: f32) -> Self {
        let mut controller = Self {
            target,
            ..Default::default()
        };
        controller.goal.distance = distance;
        controller.current.distance = distance;
        controller
    }

    /// Start at specific angles
    pub fn with_angles(mut self, azimuth_degrees: f32, elevation_degrees: f32) -> Self {
        self.goal.azimuth = azimuth_degrees.to_radians();
        self.goal.elevation = clamp_elevation(
            elevation_degrees.to_radians(),
            self.min_elevation,
            self.max_elevation,
        );
        self.current = self.goal;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping.clamp(f32::EPSILON, 1.0);
        self
    }

    /// Initialize from the camera's current position and target
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        self.target = camera.target;
        let mut spherical = Spherical::from_cartesian(camera.position - camera.target);
        spherical.elevation =
            clamp_elevation(spherical.elevation, self.min_elevation, self.max_elevation);
        self.goal = spherical;
        self.current = spherical;
    }

    /// Camera position for the current spherical state
    pub fn position(&self) -> Vec3 {
        self.target + self.current.to_cartesian()
    }

    /// Right direction on the XZ plane
    fn right_direction(&self) -> Vec3 {
        Vec3::new(-self.current.azimuth.sin(), 0.0, self.current.azimuth.cos())
    }

    /// Direction toward the target on the XZ plane
    fn forward_direction(&self) -> Vec3 {
        -Vec3::new(self.current.azimuth.cos(), 0.0, self.current.azimuth.sin())
    }
}

impl CameraController for OrbitController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.scroll_delta > 0.0 {
            self.goal.distance /= self.zoom_factor;
        } else if input.scroll_delta < 0.0 {
            self.goal.distance *= self.zoom_factor;
        }
        self.goal.distance = self.goal.distance.clamp(self.min_distance, self.max_distance);

        if input.dragging && input.pointer_delta != Vec2::ZERO {
            self.goal.azimuth += input.pointer_delta.x * self.orbit_sensitivity;
            self.goal.elevation += input.pointer_delta.y * self.orbit_sensitivity;
        }
        self.goal.elevation =
            clamp_elevation(self.goal.elevation, self.min_elevation, self.max_elevation);

        let pan = input.movement(self.forward_direction(), self.right_direction());
        if pan != Vec3::ZERO {
            let speed = if input.sprint {
                self.pan_speed * 2.0
            } else {
                self.pan_speed
            };
            self.target += pan * speed * dt;
        }

        self.current.azimuth = ease(self.current.azimuth, self.goal.azimuth, self.damping);
        self.current.elevation = ease(self.current.elevation, self.goal.elevation, self.damping);
        self.current.distance = ease(self.current.distance, self.goal.distance, self.damping);

        // Wrap both together so easing never spins the long way round
        if self.goal.azimuth.abs() > 2.0 * PI {
            let turns = (self.goal.azimuth / (2.0 * PI)).trunc() * 2.0 * PI;
            self.goal.azimuth -= turns;
            self.current.azimuth -= turns;
        }

        camera.position = self.position();
        camera.target = self.target;
        camera.up = Vec3::Y;
        camera.update();
    }

    fn name(&self) -> &'static str {
        "Orbit"
    }

    fn reset(&mut self) {
        let defaults = Self::default();
        self.target = defaults.target;
        self.current = defaults.current;
        self.goal = defaults.goal;
    }
}

/// Arcball camera controller
///
/// Dragging rotates the camera around `center` as if the pointer were
/// grabbing a sphere filling the viewport. Unlike orbit there is no fixed
/// world up; the camera's up vector rotates with it.
pub struct ArcballController {
    pub center: Vec3,
    pub distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub zoom_factor: f32,
    /// Fraction of the remaining rotation covered per update, in (0, 1]
    pub damping: f32,
    goal_orientation: Quat,
    orientation: Quat,
    goal_distance: f32,
    last_pointer: Option<Vec3>,
}

impl Default for ArcballController {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            distance: 10.0,
            min_distance: 1.0,
            max_distance: 100.0,
            zoom_factor: 1.1,
            damping: 0.2,
            goal_orientation: Quat::IDENTITY,
            orientation: Quat::IDENTITY,
            goal_distance: 10.0,
            last_pointer: None,
        }
    }
}

impl ArcballController {
    pub fn new(center: Vec3, distance: f32) -> Self {
        Self {
            center,
            distance,
            goal_distance: distance,
            ..Default::default()
        }
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping.clamp(f32::EPSILON, 1.0);
        self
    }

    /// Project a point in normalized device coordinates onto the unit
    /// sphere, or onto its silhouette when outside it
    pub fn project_to_sphere(ndc: Vec2) -> Vec3 {
        let d = ndc.length_squared();
        if d <= 1.0 {
            Vec3::new(ndc.x, ndc.y, (1.0 - d).sqrt())
        } else {
            ndc.normalize().extend(0.0)
        }
    }

    /// Current orientation; the camera looks down its local -Z
    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn position(&self) -> Vec3 {
        self.center + self.orientation * Vec3::new(0.0, 0.0, self.distance)
    }

    /// Initialize from the camera's current position, target and up
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        self.center = camera.target;
        let offset = camera.position - camera.target;
        self.distance = offset.length().max(self.min_distance);
        self.goal_distance = self.distance;

        let back = offset.normalize_or_zero();
        if back == Vec3::ZERO {
            return;
        }
        let right = camera.up.cross(back).normalize_or_zero();
        if right == Vec3::ZERO {
            return;
        }
        let up = back.cross(right);
        let orientation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, back)).normalize();
        self.orientation = orientation;
        self.goal_orientation = orientation;
    }
}

impl CameraController for ArcballController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, _dt: f32) {
        if input.scroll_delta > 0.0 {
            self.goal_distance /= self.zoom_factor;
        } else if input.scroll_delta < 0.0 {
            self.goal_distance *= self.zoom_factor;
        }
        self.goal_distance = self.goal_distance.clamp(self.min_distance, self.max_distance);

        if input.dragging {
            let point = Self::project_to_sphere(input.pointer_ndc);
            if let Some(last) = self.last_pointer {
                if last != point {
                    // The scene follows the pointer, so the camera turns the other way
                    let drag = Quat::from_rotation_arc(point, last);
                    self.goal_orientation = (self.goal_orientation * drag).normalize();
                }
            }
            self.last_pointer = Some(point);
        } else {
            self.last_pointer = None;
        }

        self.orientation = self
            .orientation
            .slerp(self.goal_orientation, self.damping)
            .normalize();
        self.distance = ease(self.distance, self.goal_distance, self.damping);

        camera.position = self.position();
        camera.target = self.center;
        camera.up = self.orientation * Vec3::Y;
        camera.update();
    }

    fn name(&self) -> &'static str {
        "Arcball"
    }

    fn reset(&mut self) {
        self.orientation = Quat::IDENTITY;
        self.goal_orientation = Quat::IDENTITY;
        self.last_pointer = None;
    }
}

/// First-person camera controller
///
/// - WASD: move along the view direction
/// - QE: move up/down
/// - Drag: look around
/// - Scroll: adjust movement speed
/// - Shift: sprint
pub struct FirstPersonController {
    /// Current yaw angle (horizontal rotation) in radians
    pub yaw: f32,
    /// Current pitch angle in radians, positive looks down
    pub pitch: f32,
    pub goal_yaw: f32,
    pub goal_pitch: f32,
    /// Base movement speed in units per second
    pub move_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Mouse sensitivity (radians per pixel)
    pub mouse_sensitivity: f32,
    pub sprint_multiplier: f32,
    /// Speed change per scroll unit
    pub scroll_speed_factor: f32,
    /// Fraction of the remaining look rotation covered per update, in (0, 1]
    pub damping: f32,
}

impl Default for FirstPersonController {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            goal_yaw: 0.0,
            goal_pitch: 0.0,
            move_speed: 5.0,
            min_speed: 0.5,
            max_speed: 50.0,
            mouse_sensitivity: 0.003,
            sprint_multiplier: 2.0,
            scroll_speed_factor: 1.2,
            damping: 0.5,
        }
    }
}

impl FirstPersonController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.mouse_sensitivity = sensitivity;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping.clamp(f32::EPSILON, 1.0);
        self
    }

    /// Initialize yaw/pitch from the camera's current orientation
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        let forward = (camera.target - camera.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return;
        }
        self.yaw = forward.z.atan2(forward.x);
        self.pitch = clamp_elevation((-forward.y).asin(), -MAX_ELEVATION, MAX_ELEVATION);
        self.goal_yaw = self.yaw;
        self.goal_pitch = self.pitch;
    }

    /// View direction for the current yaw/pitch
    pub fn forward_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            -self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    /// Right direction on the XZ plane
    fn right_direction(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, self.yaw.cos())
    }
}

impl CameraController for FirstPersonController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.scroll_delta > 0.0 {
            self.move_speed *= self.scroll_speed_factor;
        } else if input.scroll_delta < 0.0 {
            self.move_speed /= self.scroll_speed_factor;
        }
        self.move_speed = self.move_speed.clamp(self.min_speed, self.max_speed);

        if input.dragging && input.pointer_delta != Vec2::ZERO {
            self.goal_yaw += input.pointer_delta.x * self.mouse_sensitivity;
            self.goal_pitch += input.pointer_delta.y * self.mouse_sensitivity;
        }
        self.goal_pitch = clamp_elevation(self.goal_pitch, -MAX_ELEVATION, MAX_ELEVATION);

        self.yaw = ease(self.yaw, self.goal_yaw, self.damping);
        self.pitch = ease(self.pitch, self.goal_pitch, self.damping);

        let forward = self.forward_direction();
        let velocity = input.movement(forward, self.right_direction());
        let speed = if input.sprint {
            self.move_speed * self.sprint_multiplier
        } else {
            self.move_speed
        };

        camera.position += velocity * speed * dt;
        camera.target = camera.position + forward;
        camera.up = Vec3::Y;
        camera.update();
    }

    fn name(&self) -> &'static str {
        "FirstPerson"
    }

    fn reset(&mut self) {
        self.yaw = 0.0;
        self.pitch = 0.0;
        self.goal_yaw = 0.0;
        self.goal_pitch = 0.0;
        self.move_speed = 5.0;
    }
}

/// Camera controller that can switch between different control modes
pub struct MultiModeController {
    controllers: Vec<Box<dyn CameraController>>,
    active_index: usize,
}

impl MultiModeController {
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
            active_index: 0,
        }
    }

    pub fn add_controller<C: CameraController + 'static>(mut self, controller: C) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    pub fn switch_to(&mut self, index: usize) {
        if index < self.controllers.len() {
            self.active_index = index;
        }
    }

    pub fn switch_next(&mut self) {
        if !self.controllers.is_empty() {
            self.active_index = (self.active_index + 1) % self.controllers.len();
        }
    }

    pub fn active_name(&self) -> &'static str {
        self.controllers
            .get(self.active_index)
            .map(|c| c.name())
            .unwrap_or("None")
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }
}

impl Default for MultiModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraController for MultiModeController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if let Some(controller) = self.controllers.get_mut(self.active_index) {
            controller.update(camera, input, dt);
        }
    }

    fn name(&self) -> &'static str {
        "MultiMode"
    }

    fn reset(&mut self) {
        if let Some(controller) = self.controllers.get_mut(self.active_index) {
            controller.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drag(delta: Vec2) -> CameraInput {
        CameraInput {
            pointer_delta: delta,
            dragging: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_orbit_eases_toward_goal() {
        let mut camera = Camera::default();
        let mut orbit = OrbitController::new(Vec3::ZERO, 10.0)
            .with_angles(0.0, 0.0)
            .with_damping(0.5);

        orbit.update(&mut camera, &drag(Vec2::new(100.0, 0.0)), 0.016);
        assert!((orbit.goal.azimuth - 0.5).abs() < 1e-6);
        assert!((orbit.current.azimuth - 0.25).abs() < 1e-6);

        let idle = CameraInput::default();
        orbit.update(&mut camera, &idle, 0.016);
        assert!((orbit.current.azimuth - 0.375).abs() < 1e-6);
        assert!((camera.position.length() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_orbit_elevation_stays_inside_open_interval() {
        let mut camera = Camera::default();
        let mut orbit = OrbitController::default().with_damping(1.0);
        orbit.update(&mut camera, &drag(Vec2::new(0.0, 1.0e6)), 0.016);

        assert!(orbit.current.elevation < FRAC_PI_2);
        assert!((orbit.current.elevation - MAX_ELEVATION).abs() < 1e-6);
        assert!(camera.view_matrix().is_finite());

        orbit.update(&mut camera, &drag(Vec2::new(0.0, -1.0e7)), 0.016);
        assert!(orbit.current.elevation > -FRAC_PI_2);
    }

    #[test]
    fn test_arcball_keeps_distance_and_rotates_up() {
        let mut camera = Camera::default();
        let mut arcball = ArcballController::new(Vec3::ZERO, 5.0).with_damping(1.0);

        let mut input = CameraInput {
            dragging: true,
            pointer_ndc: Vec2::ZERO,
            ..Default::default()
        };
        arcball.update(&mut camera, &input, 0.016);
        assert!(camera.position.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));

        input.pointer_ndc = Vec2::new(0.0, 0.5);
        arcball.update(&mut camera, &input, 0.016);
        assert!((camera.position.length() - 5.0).abs() < 1e-4);
        assert!(camera.position.y < 0.0);
        assert!((camera.up.dot(camera.forward())).abs() < 1e-4);
    }

    #[test]
    fn test_arcball_projection_outside_sphere() {
        let point = ArcballController::project_to_sphere(Vec2::new(2.0, 0.0));
        assert_eq!(point, Vec3::X);
        let inside = ArcballController::project_to_sphere(Vec2::ZERO);
        assert_eq!(inside, Vec3::Z);
    }

    #[test]
    fn test_first_person_moves_along_view() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::X);
        let mut controller = FirstPersonController::new().with_speed(2.0);
        controller.sync_with_camera(&camera);

        let input = CameraInput {
            forward: true,
            ..Default::default()
        };
        controller.update(&mut camera, &input, 0.5);
        assert!(camera.position.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5));
        assert!(camera.forward().abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn test_first_person_pitch_clamped() {
        let mut camera = Camera::default();
        let mut controller = FirstPersonController::new().with_damping(1.0);
        controller.update(&mut camera, &drag(Vec2::new(0.0, -1.0e6)), 0.016);
        assert!(controller.pitch > -FRAC_PI_2);
        assert!(camera.view_matrix().is_finite());
    }

    #[test]
    fn test_multi_mode_switching() {
        let mut multi = MultiModeController::new()
            .add_controller(OrbitController::default())
            .add_controller(FirstPersonController::default());
        assert_eq!(multi.active_name(), "Orbit");
        multi.switch_next();
        assert_eq!(multi.active_name(), "FirstPerson");
        multi.switch_to(7);
        assert_eq!(multi.active_index(), 1);
    }
}
