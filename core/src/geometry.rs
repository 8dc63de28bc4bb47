//! Map-space geometry: integer tiles, floating map positions, rectangles,
//! and the 8-way direction math used by movement and facing checks.

use serde::{Deserialize, Serialize};

/// Tile offsets per direction, indexed 0..8.
/// Direction 0 is south-west, continuing clockwise.
pub const DIRECTION_DELTA_X: [i32; 8] = [-1, -1, -1, 0, 1, 1, 1, 0];
pub const DIRECTION_DELTA_Y: [i32; 8] = [1, 0, -1, -1, -1, 0, 1, 1];

/// Diagonal steps cover sqrt(2) tiles, so diagonal movers are slowed to keep
/// speed uniform across directions.
pub const SPEED_MULTIPLIER: [f32; 8] = [
    std::f32::consts::FRAC_1_SQRT_2,
    1.0,
    std::f32::consts::FRAC_1_SQRT_2,
    1.0,
    std::f32::consts::FRAC_1_SQRT_2,
    1.0,
    std::f32::consts::FRAC_1_SQRT_2,
    1.0,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<FPoint> for Point {
    fn from(p: FPoint) -> Self {
        Point {
            x: p.x.floor() as i32,
            y: p.y.floor() as i32,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FPoint {
    pub x: f32,
    pub y: f32,
}

impl FPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Snap to the center of the containing tile.
    pub fn align(&mut self) {
        self.x = self.x.floor() + 0.5;
        self.y = self.y.floor() + 0.5;
    }

    /// Center of the given tile.
    pub fn tile_center(p: Point) -> Self {
        FPoint {
            x: p.x as f32 + 0.5,
            y: p.y as f32 + 0.5,
        }
    }
}

impl From<Point> for FPoint {
    fn from(p: Point) -> Self {
        FPoint {
            x: p.x as f32,
            y: p.y as f32,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.x + self.w && p.y >= self.y && p.y < self.y + self.h
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

pub fn calc_dist(p1: FPoint, p2: FPoint) -> f32 {
    ((p2.x - p1.x) * (p2.x - p1.x) + (p2.y - p1.y) * (p2.y - p1.y)).sqrt()
}

/// Polar angle of the vector (x1,y1) -> (x2,y2), in [0, 2*pi).
pub fn calc_theta(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let mut theta = (y2 - y1).atan2(x2 - x1);
    if theta < 0.0 {
        theta += std::f32::consts::TAU;
    }
    theta
}

/// 8-way direction of the vector (x0,y0) -> (x1,y1).
pub fn calc_direction(x0: f32, y0: f32, x1: f32, y1: f32) -> u8 {
    let theta = calc_theta(x0, y0, x1, y1);
    // dividing the circle into eight wedges, offset by half a wedge
    let val = theta / (std::f32::consts::PI / 4.0) + 4.5;
    (val as i32 % 8) as u8
}

/// Position `dist` map units away from `pos` in the given direction.
pub fn calc_vector(pos: FPoint, direction: u8, dist: f32) -> FPoint {
    let dir = (direction % 8) as usize;
    let step = dist * SPEED_MULTIPLIER[dir];
    FPoint {
        x: pos.x + step * DIRECTION_DELTA_X[dir] as f32,
        y: pos.y + step * DIRECTION_DELTA_Y[dir] as f32,
    }
}

/// Rotate an 8-way direction by `val` steps (positive is clockwise).
pub fn rotate_direction(direction: u8, val: i32) -> u8 {
    (((direction as i32 + val) % 8 + 8) % 8) as u8
}

pub fn is_within_radius(center: FPoint, radius: f32, target: FPoint) -> bool {
    calc_dist(center, target) < radius
}

/// Clamp `target` so that it is no farther than `range` from `src`.
/// A range of 0 leaves the target untouched.
pub fn clamp_distance(range: f32, src: FPoint, target: FPoint) -> FPoint {
    if range <= 0.0 {
        return target;
    }
    let dist = calc_dist(src, target);
    if dist <= range {
        return target;
    }
    let theta = calc_theta(src.x, src.y, target.x, target.y);
    FPoint {
        x: src.x + range * theta.cos(),
        y: src.y + range * theta.sin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_of_cardinal_vectors() {
        // east
        assert_eq!(calc_direction(0.0, 0.0, 1.0, 0.0), 5);
        // west
        assert_eq!(calc_direction(0.0, 0.0, -1.0, 0.0), 1);
        // south (y grows downward on the map)
        assert_eq!(calc_direction(0.0, 0.0, 0.0, 1.0), 7);
        // north
        assert_eq!(calc_direction(0.0, 0.0, 0.0, -1.0), 3);
    }

    #[test]
    fn rotate_direction_wraps() {
        assert_eq!(rotate_direction(7, 1), 0);
        assert_eq!(rotate_direction(0, -1), 7);
        assert_eq!(rotate_direction(3, 8), 3);
    }

    #[test]
    fn calc_vector_round_trip() {
        let origin = FPoint::new(5.5, 5.5);
        for dir in 0..8u8 {
            let p = calc_vector(origin, dir, 1.0);
            assert_eq!(calc_direction(origin.x, origin.y, p.x, p.y), dir);
        }
    }

    #[test]
    fn clamp_distance_limits_range() {
        let src = FPoint::new(0.0, 0.0);
        let target = FPoint::new(10.0, 0.0);
        let clamped = clamp_distance(3.0, src, target);
        assert!((calc_dist(src, clamped) - 3.0).abs() < 1e-4);
        // in-range targets are untouched
        let near = FPoint::new(1.0, 1.0);
        assert_eq!(clamp_distance(3.0, src, near), near);
    }

    #[test]
    fn rect_contains_is_half_open() {
        let r = Rect::new(2, 2, 3, 3);
        assert!(r.contains(Point::new(2, 2)));
        assert!(r.contains(Point::new(4, 4)));
        assert!(!r.contains(Point::new(5, 4)));
    }
}
