//! 3D position math and spatial audio helpers
//!
//! Coordinate convention: +x right, +y forward, +z up, distances in meters.
//! Azimuth is measured from the listener's forward axis, positive to the
//! right; elevation is positive upward.

use std::f32::consts::PI;

/// 3-component vector
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Default listener forward (+y)
    pub const FORWARD: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    /// Default listener up (+z)
    pub const UP: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    #[inline]
    pub fn distance(&self, other: &Vec3) -> f32 {
        (*self - *other).magnitude()
    }

    #[inline]
    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Unit vector, or forward when the magnitude is degenerate
    pub fn normalize(&self) -> Vec3 {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Vec3::FORWARD;
        }
        Vec3 {
            x: self.x / mag,
            y: self.y / mag,
            z: self.z / mag,
        }
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;
    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, scalar: f32) -> Vec3 {
        Vec3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// Spherical coordinate in the listener's local frame
///
/// Azimuth in [-pi, pi], elevation in [-pi/2, pi/2], distance >= 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SphericalCoord {
    pub azimuth: f32,
    pub elevation: f32,
    pub distance: f32,
}

impl SphericalCoord {
    pub fn new(azimuth: f32, elevation: f32, distance: f32) -> Self {
        Self {
            azimuth,
            elevation,
            distance: distance.max(0.0),
        }
    }

    /// Convert to a cartesian point in the same frame
    pub fn to_cartesian(&self) -> Vec3 {
        Vec3 {
            x: self.distance * self.elevation.cos() * self.azimuth.sin(),
            y: self.distance * self.elevation.cos() * self.azimuth.cos(),
            z: self.distance * self.elevation.sin(),
        }
    }

    /// Convert a local-frame cartesian point to spherical
    pub fn from_cartesian(point: Vec3) -> Self {
        let distance = point.magnitude();
        if distance < 1e-10 {
            return Self::default();
        }
        Self {
            azimuth: point.x.atan2(point.y),
            elevation: (point.z / distance).asin(),
            distance,
        }
    }
}

/// Pure spatial audio math
pub struct SpatialMath;

impl SpatialMath {
    /// Default head radius in meters (spherical head model)
    pub const HEAD_RADIUS: f32 = 0.0875;

    /// Default speed of sound in m/s
    pub const SPEED_OF_SOUND: f32 = 343.0;

    /// Sources closer than this are treated as being at this distance
    pub const MIN_DISTANCE: f32 = 0.1;

    /// Source position expressed in the listener's local frame
    ///
    /// `forward` and `up` must be unit vectors.
    pub fn relative_position(
        source: Vec3,
        listener: Vec3,
        listener_forward: Vec3,
        listener_up: Vec3,
    ) -> SphericalCoord {
        let rel = source - listener;
        let right = listener_forward.cross(&listener_up);

        let local = Vec3::new(
            rel.dot(&right),
            rel.dot(&listener_forward),
            rel.dot(&listener_up),
        );
        SphericalCoord::from_cartesian(local)
    }

    /// Inverse-distance attenuation scaled by a reference distance
    ///
    /// Unity inside the reference distance; the source distance is clamped
    /// below at 0.1 m.
    pub fn distance_attenuation(distance: f32, reference_distance: f32) -> f32 {
        let distance = distance.max(Self::MIN_DISTANCE);
        let reference = reference_distance.max(Self::MIN_DISTANCE);
        (reference / distance).min(1.0)
    }

    /// Air absorption low-pass cutoff in Hz
    ///
    /// cutoff = 20000 * exp(-0.1 * distance * (1 + humidity / 100))
    pub fn air_absorption_cutoff(distance: f32, humidity: f32) -> f32 {
        20_000.0 * (-0.1 * distance * (1.0 + humidity / 100.0)).exp()
    }

    /// Doppler shift ratio for moving source and listener
    ///
    /// ratio = (c - v_listener . u) / (c - v_source . u), with u the unit
    /// vector from source to listener. Ratios are clamped to [0.5, 2.0] (one
    /// octave either way) to keep runaway velocities audible rather than
    /// destructive.
    pub fn doppler_ratio(
        source_velocity: Vec3,
        listener_velocity: Vec3,
        source_to_listener: Vec3,
        speed_of_sound: f32,
    ) -> f32 {
        let direction = source_to_listener.normalize();
        let denominator = speed_of_sound - source_velocity.dot(&direction);
        if denominator.abs() < 1e-6 {
            return 2.0;
        }
        let numerator = speed_of_sound - listener_velocity.dot(&direction);
        (numerator / denominator).clamp(0.5, 2.0)
    }

    /// Interaural time difference in seconds (spherical head approximation)
    ///
    /// ITD = (r / c) * (theta + sin theta). Positive azimuth (source to the
    /// right) yields a positive value: the left ear receives late.
    pub fn interaural_time_difference(azimuth: f32, head_radius: f32) -> f32 {
        let theta = azimuth.clamp(-PI, PI);
        (head_radius / Self::SPEED_OF_SOUND) * (theta + theta.sin())
    }

    /// Interaural level difference in dB (frequency-independent head shadow)
    ///
    /// Scaled by |sin azimuth| and tapered toward the poles. Positive
    /// azimuth means the right ear is louder.
    pub fn interaural_level_difference(azimuth: f32, elevation: f32) -> f32 {
        const MAX_SHADOW_DB: f32 = 6.0;
        MAX_SHADOW_DB * azimuth.sin() * elevation.cos().abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_algebra() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, -5.0, 6.0);

        assert_relative_eq!(a.dot(&b), 12.0);
        let cross = a.cross(&b);
        assert_relative_eq!(cross.x, 27.0);
        assert_relative_eq!(cross.y, 6.0);
        assert_relative_eq!(cross.z, -13.0);

        assert_relative_eq!(Vec3::new(3.0, 4.0, 0.0).magnitude(), 5.0);
        assert_relative_eq!(Vec3::new(3.0, 4.0, 0.0).normalize().magnitude(), 1.0);
    }

    #[test]
    fn test_spherical_roundtrip() {
        let original = SphericalCoord::new(0.7, 0.3, 2.5);
        let back = SphericalCoord::from_cartesian(original.to_cartesian());

        assert_relative_eq!(back.azimuth, original.azimuth, epsilon = 1e-5);
        assert_relative_eq!(back.elevation, original.elevation, epsilon = 1e-5);
        assert_relative_eq!(back.distance, original.distance, epsilon = 1e-5);
    }

    #[test]
    fn test_relative_position_front_and_right() {
        let listener = Vec3::ZERO;

        // Directly ahead
        let coord = SpatialMath::relative_position(
            Vec3::new(0.0, 2.0, 0.0),
            listener,
            Vec3::FORWARD,
            Vec3::UP,
        );
        assert_relative_eq!(coord.azimuth, 0.0, epsilon = 1e-6);
        assert_relative_eq!(coord.distance, 2.0, epsilon = 1e-6);

        // Directly right
        let coord = SpatialMath::relative_position(
            Vec3::new(3.0, 0.0, 0.0),
            listener,
            Vec3::FORWARD,
            Vec3::UP,
        );
        assert_relative_eq!(coord.azimuth, PI / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_relative_position_rotated_listener() {
        // Listener facing +x; a source ahead of the listener sits at azimuth 0
        let coord = SpatialMath::relative_position(
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::UP,
        );
        assert_relative_eq!(coord.azimuth, 0.0, epsilon = 1e-5);
        assert_relative_eq!(coord.distance, 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_distance_attenuation() {
        // Unity at or inside the reference distance
        assert_relative_eq!(SpatialMath::distance_attenuation(0.5, 1.0), 1.0);
        assert_relative_eq!(SpatialMath::distance_attenuation(1.0, 1.0), 1.0);
        // Inverse law beyond
        assert_relative_eq!(SpatialMath::distance_attenuation(2.0, 1.0), 0.5);
        assert_relative_eq!(SpatialMath::distance_attenuation(10.0, 1.0), 0.1);
        // Clamped below at 0.1 m
        assert_relative_eq!(
            SpatialMath::distance_attenuation(0.0, 1.0),
            SpatialMath::distance_attenuation(0.1, 1.0)
        );
    }

    #[test]
    fn test_air_absorption_cutoff() {
        // No distance, full bandwidth
        assert_relative_eq!(SpatialMath::air_absorption_cutoff(0.0, 50.0), 20_000.0);
        // Cutoff falls with distance
        let near = SpatialMath::air_absorption_cutoff(1.0, 50.0);
        let far = SpatialMath::air_absorption_cutoff(10.0, 50.0);
        assert!(near > far);
        // More humidity, more absorption
        let dry = SpatialMath::air_absorption_cutoff(5.0, 0.0);
        let humid = SpatialMath::air_absorption_cutoff(5.0, 100.0);
        assert!(dry > humid);
    }

    #[test]
    fn test_doppler_ratio() {
        let c = SpatialMath::SPEED_OF_SOUND;
        // Stationary: no shift
        assert_relative_eq!(
            SpatialMath::doppler_ratio(Vec3::ZERO, Vec3::ZERO, Vec3::FORWARD, c),
            1.0
        );
        // Source approaching the listener raises pitch
        let ratio = SpatialMath::doppler_ratio(
            Vec3::new(0.0, 10.0, 0.0), // toward listener (direction = +y)
            Vec3::ZERO,
            Vec3::new(0.0, 1.0, 0.0),
            c,
        );
        assert!(ratio > 1.0);
        // Source receding lowers pitch
        let ratio = SpatialMath::doppler_ratio(
            Vec3::new(0.0, -10.0, 0.0),
            Vec3::ZERO,
            Vec3::new(0.0, 1.0, 0.0),
            c,
        );
        assert!(ratio < 1.0);
    }

    #[test]
    fn test_itd_symmetry_and_bounds() {
        let r = SpatialMath::HEAD_RADIUS;
        assert_relative_eq!(SpatialMath::interaural_time_difference(0.0, r), 0.0);

        let right = SpatialMath::interaural_time_difference(PI / 2.0, r);
        let left = SpatialMath::interaural_time_difference(-PI / 2.0, r);
        assert_relative_eq!(right, -left, epsilon = 1e-9);

        // Spherical head maximum is ~0.66 ms for the default radius
        assert!(right > 0.0006 && right < 0.0007, "itd {}", right);
    }

    #[test]
    fn test_ild_shape() {
        assert_relative_eq!(SpatialMath::interaural_level_difference(0.0, 0.0), 0.0);
        let right = SpatialMath::interaural_level_difference(PI / 2.0, 0.0);
        assert!(right > 0.0);
        let left = SpatialMath::interaural_level_difference(-PI / 2.0, 0.0);
        assert_relative_eq!(right, -left, epsilon = 1e-6);
        // ILD collapses at the pole
        let pole = SpatialMath::interaural_level_difference(PI / 2.0, PI / 2.0);
        assert!(pole.abs() < 1e-6);
    }
}
