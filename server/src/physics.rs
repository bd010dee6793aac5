//! Ground-plane vector math for simulated actors.
//!
//! Tigers move on the horizontal X/Z plane; height is carried separately.

/// Represents a vector on the X/Z ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    /// Value along the x-axis.
    pub x: f32,
    /// Value along the z-axis.
    pub z: f32,
}

impl Vector2 {
    pub const fn new(x: f32, z: f32) -> Self {
        Vector2 { x, z }
    }

    /// Unit-circle offset for `angle_degrees`, scaled by `distance`.
    pub fn from_polar(angle_degrees: f32, distance: f32) -> Vector2 {
        let radians = angle_degrees.to_radians();
        Vector2 {
            x: radians.cos() * distance,
            z: radians.sin() * distance,
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2 { x: 0.0, z: 0.0 }
        } else {
            Vector2 {
                x: self.x / mag,
                z: self.z / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            z: self.z * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            z: self.z + other.z,
        }
    }

    ///Returns `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            z: self.z - other.z,
        }
    }

    pub fn distance_squared(&self, other: &Vector2) -> f32 {
        let d = self.sub(other);
        d.x * d.x + d.z * d.z
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Heading in degrees for facing along this vector, measured from +Z
    /// toward +X (the client's yaw convention).
    pub fn yaw_degrees(&self) -> f32 {
        self.x.atan2(self.z).to_degrees()
    }
}

/// Closest of `candidates` to `origin`, if any.
pub fn nearest(origin: &Vector2, candidates: &[Vector2]) -> Option<Vector2> {
    candidates.iter().copied().min_by(|a, b| {
        a.distance_squared(origin)
            .total_cmp(&b.distance_squared(origin))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_magnitude_and_normalize() {
        let v = Vector2::new(3.0, 4.0);
        assert_approx_eq!(v.magnitude(), 5.0);
        let n = v.normalize();
        assert_approx_eq!(n.x, 0.6);
        assert_approx_eq!(n.z, 0.8);
        assert_eq!(Vector2::default().normalize(), Vector2::default());
    }

    #[test]
    fn test_from_polar() {
        let v = Vector2::from_polar(90.0, 10.0);
        assert_approx_eq!(v.x, 0.0, 1e-4);
        assert_approx_eq!(v.z, 10.0, 1e-4);
        assert_approx_eq!(Vector2::from_polar(217.0, 42.0).magnitude(), 42.0, 1e-3);
    }

    #[test]
    fn test_yaw_convention() {
        assert_approx_eq!(Vector2::new(0.0, 1.0).yaw_degrees(), 0.0);
        assert_approx_eq!(Vector2::new(1.0, 0.0).yaw_degrees(), 90.0);
        assert_approx_eq!(Vector2::new(0.0, -1.0).yaw_degrees().abs(), 180.0);
    }

    #[test]
    fn test_nearest() {
        let origin = Vector2::new(0.0, 0.0);
        let candidates = [
            Vector2::new(10.0, 10.0),
            Vector2::new(-2.0, 1.0),
            Vector2::new(5.0, 0.0),
        ];
        assert_eq!(nearest(&origin, &candidates), Some(Vector2::new(-2.0, 1.0)));
        assert_eq!(nearest(&origin, &[]), None);
    }
}
