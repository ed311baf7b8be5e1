// Orbit camera driven by pointer drag and scroll

use glam::Vec3;
use std::f32::consts::FRAC_PI_2;

const ROTATE_SPEED: f32 = 0.005; // radians per pixel
const ZOOM_STEP: f32 = 0.1;
const MIN_DISTANCE: f32 = 1.0;
const MAX_DISTANCE: f32 = 50.0;
const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.3,
            distance: 5.0,
        }
    }
}

impl OrbitCamera {
    /// Drag by (dx, dy) pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw - dx * ROTATE_SPEED).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + dy * ROTATE_SPEED).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Positive scroll moves closer.
    pub fn zoom(&mut self, scroll: f32) {
        let factor = 1.0 - scroll * ZOOM_STEP;
        self.distance = (self.distance * factor.max(0.1)).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn eye(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + Vec3::new(cp * sy, sp, cp * cy) * self.distance
    }

    /// Unit vector from the eye toward the target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye()).normalize_or_zero()
    }

    /// 0 at the nearest zoom, 1 at the farthest.
    pub fn zoom_fraction(&self) -> f32 {
        (self.distance - MIN_DISTANCE) / (MAX_DISTANCE - MIN_DISTANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_sits_at_distance_from_target() {
        let camera = OrbitCamera {
            target: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        assert!(((camera.eye() - camera.target).length() - camera.distance).abs() < 1e-4);
        assert!((camera.forward().length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = OrbitCamera::default();
        camera.rotate(0.0, 10_000.0);
        assert!(camera.pitch <= PITCH_LIMIT);
        camera.rotate(0.0, -100_000.0);
        assert!(camera.pitch >= -PITCH_LIMIT);
    }

    #[test]
    fn yaw_wraps() {
        let mut camera = OrbitCamera::default();
        camera.rotate(-10_000.0, 0.0);
        assert!((0.0..std::f32::consts::TAU).contains(&camera.yaw));
    }

    #[test]
    fn zoom_stays_in_range() {
        let mut camera = OrbitCamera::default();
        for _ in 0..100 {
            camera.zoom(5.0);
        }
        assert_eq!(camera.distance, MIN_DISTANCE);
        for _ in 0..100 {
            camera.zoom(-5.0);
        }
        assert_eq!(camera.distance, MAX_DISTANCE);
        assert!((camera.zoom_fraction() - 1.0).abs() < 1e-6);
    }
}
