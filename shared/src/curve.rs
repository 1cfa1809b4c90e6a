//! Keyframed curves sampled by root-motion sources.
//!
//! Curves are plain values (sorted keys, linear interpolation, clamped ends) so they can be
//! cloned into saved moves and sent over the wire next to the source that uses them.

use crate::math::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloatKey {
    pub time: f32,
    pub value: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorKey {
    pub time: f32,
    pub value: Vec3,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatCurve {
    keys: Vec<FloatKey>,
}

impl FloatCurve {
    /// Build from `(time, value)` pairs; keys are sorted by time.
    pub fn new(points: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let mut keys: Vec<FloatKey> = points
            .into_iter()
            .map(|(time, value)| FloatKey { time, value })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn keys(&self) -> &[FloatKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sample at absolute curve time. An empty curve evaluates to 0.
    pub fn value_at(&self, time: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };
        if !time.is_finite() || time <= first.time {
            return first.value;
        }
        if time >= last.time {
            return last.value;
        }

        // First key strictly after `time`. Non-finite keys can leave it at either end.
        let hi = self.keys.partition_point(|k| k.time <= time);
        let (Some(&a), Some(&b)) = (hi.checked_sub(1).and_then(|i| self.keys.get(i)), self.keys.get(hi))
        else {
            return first.value;
        };
        let span = b.time - a.time;
        if span <= 0.0 {
            return b.value;
        }
        let t = (time - a.time) / span;
        a.value + (b.value - a.value) * t
    }

    /// Sample at `fraction` of the curve's own key range.
    pub fn value_at_fraction(&self, fraction: f32) -> f32 {
        let (min, max) = self.time_range();
        self.value_at(min + (max - min) * fraction)
    }

    fn time_range(&self) -> (f32, f32) {
        match (self.keys.first(), self.keys.last()) {
            (Some(a), Some(b)) => (a.time, b.time),
            _ => (0.0, 0.0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorCurve {
    keys: Vec<VectorKey>,
}

impl VectorCurve {
    pub fn new(points: impl IntoIterator<Item = (f32, Vec3)>) -> Self {
        let mut keys: Vec<VectorKey> = points
            .into_iter()
            .map(|(time, value)| VectorKey { time, value })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn keys(&self) -> &[VectorKey] {
        &self.keys
    }

    pub fn value_at(&self, time: f32) -> Vec3 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return Vec3::zeros();
        };
        if !time.is_finite() || time <= first.time {
            return first.value;
        }
        if time >= last.time {
            return last.value;
        }

        let hi = self.keys.partition_point(|k| k.time <= time);
        let (Some(&a), Some(&b)) = (hi.checked_sub(1).and_then(|i| self.keys.get(i)), self.keys.get(hi))
        else {
            return first.value;
        };
        let span = b.time - a.time;
        if span <= 0.0 {
            return b.value;
        }
        a.value.lerp(&b.value, (time - a.time) / span)
    }

    pub fn value_at_fraction(&self, fraction: f32) -> Vec3 {
        let (min, max) = match (self.keys.first(), self.keys.last()) {
            (Some(a), Some(b)) => (a.time, b.time),
            _ => (0.0, 0.0),
        };
        self.value_at(min + (max - min) * fraction)
    }
}
