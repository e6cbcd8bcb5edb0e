//! Surfel record and its update rules.

use nalgebra::Vector3;

/// Slot index into surfel storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfelId(pub u32);

impl SurfelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An oriented colored disk in the map frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Surfel {
    pub position: Vector3<f32>,
    /// Unit normal
    pub normal: Vector3<f32>,
    pub radius: f32,
    pub color: [u8; 3],
    /// Number of consistent observations merged into this surfel
    pub confidence: u32,
    /// False for free slots
    pub valid: bool,
}

/// One accepted point, already in the map frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub radius: f32,
    pub color: [u8; 3],
}

impl Surfel {
    pub fn from_observation(obs: &Observation) -> Self {
        Self {
            position: obs.position,
            normal: obs.normal,
            radius: obs.radius,
            color: obs.color,
            confidence: 1,
            valid: true,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite()) && self.normal.iter().all(|v| v.is_finite())
    }

    /// Distance from `p` to the surfel plane.
    pub fn distance_along_normal(&self, p: &Vector3<f32>) -> f32 {
        (p - self.position).dot(&self.normal).abs()
    }

    /// Fold a consistent observation into the running mean.
    ///
    /// Each attribute is averaged with weight `confidence` for the surfel and 1
    /// for the observation. The observed normal is flipped onto the surfel's
    /// hemisphere before averaging.
    pub fn merge(&mut self, obs: &Observation) {
        let weight = self.confidence as f32;
        let total = weight + 1.0;

        self.position = (self.position * weight + obs.position) / total;

        let observed_normal = if obs.normal.dot(&self.normal) < 0.0 {
            -obs.normal
        } else {
            obs.normal
        };
        let blended = self.normal * weight + observed_normal;
        if let Some(normal) = blended.try_normalize(f32::EPSILON) {
            self.normal = normal;
        }

        self.radius = (self.radius * weight + obs.radius) / total;

        for (channel, observed) in self.color.iter_mut().zip(obs.color) {
            let mixed = (*channel as f32 * weight + observed as f32) / total;
            *channel = mixed.round().clamp(0.0, 255.0) as u8;
        }

        self.confidence = self.confidence.saturating_add(1);
    }

    /// Overwrite geometry and color with a disagreeing observation.
    pub fn replace(&mut self, obs: &Observation) {
        *self = Self::from_observation(obs);
    }
}
