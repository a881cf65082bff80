use crate::types::PixelPos;
use serde::{Deserialize, Serialize};

/// Preferred tile height in rows when partitioning a scene
pub const DEFAULT_TILE_HEIGHT: usize = 50;

/// Rectangular pixel region `[x, x + width) x [y, y + height)`
///
/// Dimensions are signed so that empty or negative rectangles can be
/// described; they simply cover no pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl TileRect {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Number of pixels covered
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.width as usize) * (self.height as usize)
        }
    }

    /// Exclusive right and bottom edges, exact even near the ends of `i64`
    fn far_edges(&self) -> (i128, i128) {
        (
            self.x as i128 + self.width as i128,
            self.y as i128 + self.height as i128,
        )
    }

    /// Whether a fractional position falls inside the rectangle
    pub fn contains(&self, pos: &PixelPos) -> bool {
        let (right, bottom) = self.far_edges();
        pos.x >= self.x as f64 && pos.x < right as f64 && pos.y >= self.y as f64 && pos.y < bottom as f64
    }

    /// Whether `other` lies entirely within this rectangle
    pub fn contains_rect(&self, other: &TileRect) -> bool {
        let (right, bottom) = self.far_edges();
        let (other_right, other_bottom) = other.far_edges();
        other.x >= self.x && other.y >= self.y && other_right <= right && other_bottom <= bottom
    }

    /// Row-major enumeration of every integer pixel in the rectangle
    pub fn positions(&self) -> TilePositions {
        TilePositions::new(*self)
    }
}

/// Iterator over the pixel coordinates of a [`TileRect`], x varying fastest.
///
/// Each call to [`TileRect::positions`] starts a fresh enumeration.
#[derive(Debug, Clone)]
pub struct TilePositions {
    rect: TileRect,
    x: i64,
    y: i64,
    done: bool,
}

impl TilePositions {
    fn new(rect: TileRect) -> Self {
        Self {
            rect,
            x: rect.x,
            y: rect.y,
            done: rect.is_empty(),
        }
    }
}

impl Iterator for TilePositions {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let pos = (self.x, self.y);
        self.x += 1;
        if self.x >= self.rect.x + self.rect.width {
            self.x = self.rect.x;
            self.y += 1;
            if self.y >= self.rect.y + self.rect.height {
                self.done = true;
            }
        }
        Some(pos)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let row_width = self.rect.width as usize;
        let rows_left = (self.rect.y + self.rect.height - self.y) as usize;
        let consumed = (self.x - self.rect.x) as usize;
        let remaining = rows_left * row_width - consumed;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TilePositions {}

/// Partition a `width x height` raster into row-major tiles.
///
/// Tiles on the right and bottom edges are clipped to the raster extent.
pub fn tile_grid(width: usize, height: usize, tile_width: usize, tile_height: usize) -> Vec<TileRect> {
    if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
        return Vec::new();
    }

    let mut tiles = Vec::with_capacity(width.div_ceil(tile_width) * height.div_ceil(tile_height));
    for y0 in (0..height).step_by(tile_height) {
        for x0 in (0..width).step_by(tile_width) {
            let w = tile_width.min(width - x0);
            let h = tile_height.min(height - y0);
            tiles.push(TileRect::new(x0 as i64, y0 as i64, w as i64, h as i64));
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_positions_row_major() {
        let rect = TileRect::new(2, 5, 3, 2);
        let positions: Vec<_> = rect.positions().collect();

        assert_eq!(
            positions,
            vec![(2, 5), (3, 5), (4, 5), (2, 6), (3, 6), (4, 6)]
        );
    }

    #[test]
    fn test_positions_count_and_uniqueness() {
        for (w, h) in [(1, 1), (1, 7), (7, 1), (13, 9), (64, 50)] {
            let rect = TileRect::new(-3, 11, w, h);
            let positions: Vec<_> = rect.positions().collect();
            assert_eq!(positions.len(), (w * h) as usize);
            assert_eq!(rect.positions().len(), (w * h) as usize);

            let unique: HashSet<_> = positions.iter().copied().collect();
            assert_eq!(unique.len(), positions.len());

            // row-major: strictly increasing (y, x) ordering
            for pair in positions.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                assert!((a.1, a.0) < (b.1, b.0));
            }
        }
    }

    #[test]
    fn test_degenerate_rectangles_are_empty() {
        for (w, h) in [(0, 5), (5, 0), (-1, 4), (4, -2), (0, 0), (-3, -3)] {
            let rect = TileRect::new(0, 0, w, h);
            assert!(rect.is_empty());
            assert_eq!(rect.positions().count(), 0);
            assert_eq!(rect.area(), 0);
        }
    }

    #[test]
    fn test_positions_restartable() {
        let rect = TileRect::new(0, 0, 4, 3);
        let first: Vec<_> = rect.positions().collect();
        let second: Vec<_> = rect.positions().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_contains_half_open() {
        let rect = TileRect::new(10, 20, 5, 5);
        assert!(rect.contains(&PixelPos::new(10.0, 20.0)));
        assert!(rect.contains(&PixelPos::new(14.9, 24.9)));
        assert!(!rect.contains(&PixelPos::new(15.0, 22.0)));
        assert!(!rect.contains(&PixelPos::new(12.0, 25.0)));
        assert!(!rect.contains(&PixelPos::new(9.99, 22.0)));
    }

    #[test]
    fn test_contains_rect_near_i64_limits() {
        let raster = TileRect::new(0, 0, 64, 64);
        let far = TileRect::new(i64::MAX - 7, 3, 17, 17);
        assert!(!raster.contains_rect(&far));
        assert!(!far.contains_rect(&raster));

        let wide = TileRect::new(i64::MAX - 100, 0, 100, i64::MAX);
        assert!(wide.contains_rect(&TileRect::new(i64::MAX - 10, 0, 10, 8)));
        assert!(!wide.contains_rect(&TileRect::new(i64::MAX - 10, 0, 11, 8)));
        assert!(!wide.contains(&PixelPos::new(1e19, 0.0)));
    }

    #[test]
    fn test_tile_grid_covers_raster() {
        let tiles = tile_grid(100, 120, 64, DEFAULT_TILE_HEIGHT);

        // 2 columns x 3 rows of tiles
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0], TileRect::new(0, 0, 64, 50));
        assert_eq!(tiles[1], TileRect::new(64, 0, 36, 50));
        assert_eq!(tiles[5], TileRect::new(64, 100, 36, 20));

        let total: usize = tiles.iter().map(|t| t.area()).sum();
        assert_eq!(total, 100 * 120);
    }

    #[test]
    fn test_tile_grid_empty() {
        assert!(tile_grid(0, 10, 4, 4).is_empty());
        assert!(tile_grid(10, 10, 0, 4).is_empty());
    }
}
