//! Occupancy grid snapshot used to classify obstacles as static.

use nalgebra::Vector2;

use crate::Float;

/// How far the static probe looks in each of the four grid directions.
const STATIC_PROBE_RANGE: usize = 20;

/// A row-major occupancy grid. Values above zero are occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    /// Cell edge length. SI unit: m
    resolution: Float,
    origin: Vector2<Float>,
    data: Vec<i8>,
}

impl OccupancyGrid {
    /// # Panics
    ///
    /// Panics if `data` does not hold exactly `width * height` cells.
    #[must_use]
    pub fn new(
        width: usize,
        height: usize,
        resolution: Float,
        origin: Vector2<Float>,
        data: Vec<i8>,
    ) -> Self {
        assert_eq!(data.len(), width * height, "grid data must fill the grid");
        Self {
            width,
            height,
            resolution,
            origin,
            data,
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn resolution(&self) -> Float {
        self.resolution
    }

    #[inline]
    #[must_use]
    pub fn origin(&self) -> Vector2<Float> {
        self.origin
    }

    /// Linear cell index of a world position, or `None` outside the grid.
    #[must_use]
    pub fn index_of(&self, position: &Vector2<Float>) -> Option<usize> {
        let mx = (position.x - self.origin.x) / self.resolution;
        let my = (position.y - self.origin.y) / self.resolution;
        if mx < 0.0 || my < 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (mx, my) = (mx as usize, my as usize);
        if mx >= self.width || my >= self.height {
            return None;
        }
        Some(my * self.width + mx)
    }

    /// Cross-shaped probe around cell `index`: walk left, right, up and
    /// down up to [`STATIC_PROBE_RANGE`] cells; any occupied cell means a
    /// wall is nearby and the location is classified as static.
    #[must_use]
    pub fn is_static(&self, index: usize) -> bool {
        if self.data.is_empty() {
            return false;
        }
        let row = index / self.width;
        let col = index % self.width;
        for j in 0..STATIC_PROBE_RANGE {
            if col >= j && self.occupied(index - j) {
                return true;
            }
            if col + j < self.width && self.occupied(index + j) {
                return true;
            }
            if row >= j && self.occupied(index - j * self.width) {
                return true;
            }
            if row + j < self.height && self.occupied(index + j * self.width) {
                return true;
            }
        }
        false
    }

    #[inline]
    fn occupied(&self, index: usize) -> bool {
        self.data.get(index).is_some_and(|&cell| cell > 0)
    }
}
