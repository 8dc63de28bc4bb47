//! The shared collision grid: tile occupancy, movement and sight tests,
//! and the axis-slide `try_move` every mover goes through.
//!
//! The grid is mutated by entities around their own movement only:
//! unblock the current tile, attempt the move, block the resulting tile.
//! Queries made in between therefore see a consistent occupancy snapshot.
//! Reads outside the map behave as solid wall.

use emberfall_core::geometry::{calc_theta, FPoint, Point};
use emberfall_core::rng::GameRng;

/// Collision cell values, as produced by the map editor. Values 7 and 8
/// are written at runtime when entities claim tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum TileCollision {
    Empty = 0,
    WallAll = 1,
    WallMovement = 2,
    HiddenAll = 3,
    HiddenMovement = 4,
    MapOnly = 5,
    MapOnlyAlt = 6,
    EntityAny = 7,
    EntityAlly = 8,
}

impl TileCollision {
    pub fn from_raw(v: u16) -> TileCollision {
        match v {
            1 => TileCollision::WallAll,
            2 => TileCollision::WallMovement,
            3 => TileCollision::HiddenAll,
            4 => TileCollision::HiddenMovement,
            5 => TileCollision::MapOnly,
            6 => TileCollision::MapOnlyAlt,
            7 => TileCollision::EntityAny,
            8 => TileCollision::EntityAlly,
            _ => TileCollision::Empty,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MovementType {
    #[default]
    Normal,
    /// Moves over movement blockers (water, pits).
    Flying,
    /// Moves through everything, including walls.
    Intangible,
}

/// Whether entity-occupied tiles count as blocked for a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollideType {
    #[default]
    Normal,
    /// The hero's own movement: ally-occupied tiles are passable when
    /// ally collision is disabled in the engine settings.
    Hero,
    NoEntity,
}

/// Positions are kept this far off tile edges after boundary-limited
/// steps, so a slid entity doesn't sit exactly on the seam.
const MIN_TILE_GAP: f32 = 0.001;

pub struct CollisionGrid {
    cells: Vec<u16>,
    w: i32,
    h: i32,
    /// When false, CollideType::Hero treats ally tiles as open.
    pub ally_collision: bool,
}

impl CollisionGrid {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            cells: vec![0; w * h],
            w: w as i32,
            h: h as i32,
            ally_collision: true,
        }
    }

    pub fn from_layer(cells: Vec<u16>, w: usize, h: usize) -> Self {
        assert_eq!(cells.len(), w * h);
        Self {
            cells,
            w: w as i32,
            h: h as i32,
            ally_collision: true,
        }
    }

    pub fn width(&self) -> i32 {
        self.w
    }

    pub fn height(&self) -> i32 {
        self.h
    }

    pub fn is_outside_map(&self, tile_x: i32, tile_y: i32) -> bool {
        tile_x < 0 || tile_y < 0 || tile_x >= self.w || tile_y >= self.h
    }

    fn cell(&self, tile_x: i32, tile_y: i32) -> TileCollision {
        if self.is_outside_map(tile_x, tile_y) {
            return TileCollision::WallAll;
        }
        TileCollision::from_raw(self.cells[(tile_y * self.w + tile_x) as usize])
    }

    pub fn set_cell(&mut self, tile_x: i32, tile_y: i32, value: TileCollision) {
        if !self.is_outside_map(tile_x, tile_y) {
            self.cells[(tile_y * self.w + tile_x) as usize] = value as u16;
        }
    }

    pub fn cell_at(&self, tile_x: i32, tile_y: i32) -> TileCollision {
        self.cell(tile_x, tile_y)
    }

    fn is_valid_tile(
        &self,
        tile_x: i32,
        tile_y: i32,
        movement_type: MovementType,
        collide_type: CollideType,
    ) -> bool {
        let cell = self.cell(tile_x, tile_y);

        match collide_type {
            CollideType::Normal => {
                if matches!(cell, TileCollision::EntityAny | TileCollision::EntityAlly) {
                    return false;
                }
            }
            CollideType::Hero => {
                if cell == TileCollision::EntityAny {
                    return false;
                }
                if cell == TileCollision::EntityAlly && self.ally_collision {
                    return false;
                }
            }
            CollideType::NoEntity => {}
        }

        match movement_type {
            MovementType::Intangible => true,
            MovementType::Flying => !matches!(
                cell,
                TileCollision::WallAll | TileCollision::HiddenAll
            ),
            MovementType::Normal => !matches!(
                cell,
                TileCollision::WallAll
                    | TileCollision::WallMovement
                    | TileCollision::HiddenAll
                    | TileCollision::HiddenMovement
            ),
        }
    }

    pub fn is_valid_position(
        &self,
        x: f32,
        y: f32,
        movement_type: MovementType,
        collide_type: CollideType,
    ) -> bool {
        if x < 0.0 || y < 0.0 {
            return false;
        }
        self.is_valid_tile(x as i32, y as i32, movement_type, collide_type)
    }

    /// Wall for sight purposes: only full blockers stop sight.
    pub fn is_wall(&self, x: f32, y: f32) -> bool {
        matches!(
            self.cell(x as i32, y as i32),
            TileCollision::WallAll | TileCollision::HiddenAll
        )
    }

    pub fn is_empty(&self, x: f32, y: f32) -> bool {
        self.cell(x as i32, y as i32) == TileCollision::Empty
    }

    /// Claim the tile under `(x, y)` for an entity. Only open tiles are
    /// claimed, so the paired `unblock` restores exactly what was there.
    pub fn block(&mut self, x: f32, y: f32, is_ally: bool) {
        let (tx, ty) = (x as i32, y as i32);
        if self.is_outside_map(tx, ty) {
            return;
        }
        if self.cell(tx, ty) == TileCollision::Empty {
            self.set_cell(
                tx,
                ty,
                if is_ally {
                    TileCollision::EntityAlly
                } else {
                    TileCollision::EntityAny
                },
            );
        }
    }

    pub fn unblock(&mut self, x: f32, y: f32) {
        let (tx, ty) = (x as i32, y as i32);
        if matches!(
            self.cell(tx, ty),
            TileCollision::EntityAny | TileCollision::EntityAlly
        ) {
            self.set_cell(tx, ty, TileCollision::Empty);
        }
    }

    /// Step along the line in unit increments of the dominant axis,
    /// applying `pred` at every visited tile. Endpoints are included.
    fn line_check<F: Fn(&Self, f32, f32) -> bool>(
        &self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        blocked: F,
    ) -> bool {
        let dx = (x2 - x1).abs();
        let dy = (y2 - y1).abs();
        let steps = dx.max(dy) as i32;

        let (step_x, step_y) = if dx > dy {
            (
                if x2 >= x1 { 1.0 } else { -1.0 },
                if dx != 0.0 { (y2 - y1) / dx } else { 0.0 },
            )
        } else if dy > 0.0 {
            (
                if dy != 0.0 { (x2 - x1) / dy } else { 0.0 },
                if y2 >= y1 { 1.0 } else { -1.0 },
            )
        } else {
            (0.0, 0.0)
        };

        let mut x = x1;
        let mut y = y1;
        for _ in 0..steps {
            x += step_x;
            y += step_y;
            if blocked(self, x, y) {
                return false;
            }
        }
        true
    }

    pub fn line_of_sight(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
        if self.is_outside_map(x2 as i32, y2 as i32) {
            return false;
        }
        self.line_check(x1, y1, x2, y2, |grid, x, y| grid.is_wall(x, y))
    }

    /// Like sight, but against the movement predicate. The target tile's
    /// occupant is cleared for the duration of the test, so a path to an
    /// entity isn't blocked by the entity itself.
    pub fn line_of_movement(
        &mut self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        movement_type: MovementType,
    ) -> bool {
        if self.is_outside_map(x2 as i32, y2 as i32) {
            return false;
        }
        if movement_type == MovementType::Intangible {
            return true;
        }

        let target_cell = self.cell(x2 as i32, y2 as i32);
        let target_blocks = matches!(
            target_cell,
            TileCollision::EntityAny | TileCollision::EntityAlly
        );
        if target_blocks {
            self.unblock(x2, y2);
        }

        let ok = self.line_check(x1, y1, x2, y2, |grid, x, y| {
            !grid.is_valid_position(x, y, movement_type, CollideType::Normal)
        });

        if target_blocks {
            self.block(x2, y2, target_cell == TileCollision::EntityAlly);
        }
        ok
    }

    /// Advance `(x, y)` by `(step_x, step_y)` with axis-independent slide.
    /// The step is consumed in tile-boundary increments so nothing skips
    /// over a wall. Returns true only if the full intended step landed.
    pub fn try_move(
        &self,
        x: &mut f32,
        y: &mut f32,
        step_x: f32,
        step_y: f32,
        movement_type: MovementType,
        collide_type: CollideType,
    ) -> bool {
        let mut rem_x = step_x;
        let mut rem_y = step_y;
        let mut full_move = true;

        while rem_x != 0.0 || rem_y != 0.0 {
            let sx = Self::sub_step(*x, &mut rem_x);
            let sy = Self::sub_step(*y, &mut rem_y);

            if self.is_valid_position(*x + sx, *y + sy, movement_type, collide_type) {
                *x += sx;
                *y += sy;
            } else if sx != 0.0
                && self.is_valid_position(*x + sx, *y, movement_type, collide_type)
            {
                // slide along x; the y component is blocked
                *x += sx;
                rem_y = 0.0;
                full_move = false;
            } else if sy != 0.0
                && self.is_valid_position(*x, *y + sy, movement_type, collide_type)
            {
                *y += sy;
                rem_x = 0.0;
                full_move = false;
            } else {
                return false;
            }
        }
        full_move
    }

    /// Take the next increment of `rem`: up to the next tile boundary,
    /// or the whole remainder if it is nearer.
    fn sub_step(pos: f32, rem: &mut f32) -> f32 {
        let step;
        if *rem > 0.0 {
            let mut to_boundary = pos.floor() + 1.0 - pos;
            if to_boundary <= MIN_TILE_GAP {
                to_boundary = 1.0;
            }
            step = rem.min(to_boundary);
        } else if *rem < 0.0 {
            let mut to_boundary = pos - (pos.ceil() - 1.0);
            if to_boundary <= MIN_TILE_GAP {
                to_boundary = 1.0;
            }
            step = -rem.abs().min(to_boundary);
        } else {
            return 0.0;
        }
        *rem -= step;
        step
    }

    /// Uniformly pick a valid tile within Chebyshev distance `radius` of
    /// `center`. Falls back to the center itself when nothing qualifies.
    pub fn get_random_neighbor(
        &self,
        center: Point,
        radius: i32,
        movement_type: MovementType,
        collide_type: CollideType,
        rng: &mut GameRng,
    ) -> FPoint {
        let mut candidates = Vec::new();
        for j in center.y - radius..=center.y + radius {
            for i in center.x - radius..=center.x + radius {
                if i == center.x && j == center.y {
                    continue;
                }
                if self.is_valid_tile(i, j, movement_type, collide_type) {
                    candidates.push(FPoint::tile_center(Point::new(i, j)));
                }
            }
        }
        if candidates.is_empty() {
            FPoint::tile_center(center)
        } else {
            candidates[rng.rand_index(candidates.len())]
        }
    }

    /// True if `(x2, y2)` lies inside the 90-degree wedge of `direction`
    /// as seen from `(x1, y1)`.
    pub fn is_facing(&self, x1: f32, y1: f32, direction: u8, x2: f32, y2: f32) -> bool {
        if x1 == x2 && y1 == y2 {
            return false;
        }
        let target_theta = calc_theta(x1, y1, x2, y2);
        let dir_theta = (direction as f32 - 4.0) * std::f32::consts::FRAC_PI_4;
        let mut diff = (target_theta - dir_theta).abs() % std::f32::consts::TAU;
        if diff > std::f32::consts::PI {
            diff = std::f32::consts::TAU - diff;
        }
        diff <= std::f32::consts::FRAC_PI_4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_wall() -> CollisionGrid {
        // 8x8, vertical wall at x=4 with a gap at y=6
        let mut grid = CollisionGrid::new(8, 8);
        for y in 0..8 {
            if y != 6 {
                grid.set_cell(4, y, TileCollision::WallAll);
            }
        }
        grid
    }

    #[test]
    fn out_of_bounds_reads_as_wall() {
        let grid = CollisionGrid::new(4, 4);
        assert!(!grid.is_valid_position(-1.0, 0.5, MovementType::Normal, CollideType::Normal));
        assert!(!grid.is_valid_position(4.5, 0.5, MovementType::Normal, CollideType::Normal));
        assert!(grid.is_wall(-1.0, -1.0));
    }

    #[test]
    fn movement_types_respect_cell_classes() {
        let mut grid = CollisionGrid::new(4, 4);
        grid.set_cell(1, 1, TileCollision::WallMovement);
        grid.set_cell(2, 2, TileCollision::WallAll);

        assert!(!grid.is_valid_position(1.5, 1.5, MovementType::Normal, CollideType::Normal));
        assert!(grid.is_valid_position(1.5, 1.5, MovementType::Flying, CollideType::Normal));
        assert!(!grid.is_valid_position(2.5, 2.5, MovementType::Flying, CollideType::Normal));
        assert!(grid.is_valid_position(2.5, 2.5, MovementType::Intangible, CollideType::Normal));
    }

    #[test]
    fn block_unblock_preserves_static_cells() {
        let mut grid = CollisionGrid::new(4, 4);
        grid.set_cell(1, 1, TileCollision::WallAll);

        // blocking a wall tile does nothing; unblock leaves it a wall
        grid.block(1.5, 1.5, false);
        grid.unblock(1.5, 1.5);
        assert_eq!(grid.cell_at(1, 1), TileCollision::WallAll);

        grid.block(2.5, 2.5, true);
        assert_eq!(grid.cell_at(2, 2), TileCollision::EntityAlly);
        grid.unblock(2.5, 2.5);
        assert_eq!(grid.cell_at(2, 2), TileCollision::Empty);
    }

    #[test]
    fn entities_block_normal_queries_only() {
        let mut grid = CollisionGrid::new(4, 4);
        grid.block(1.5, 1.5, false);
        assert!(!grid.is_valid_position(1.5, 1.5, MovementType::Normal, CollideType::Normal));
        assert!(grid.is_valid_position(1.5, 1.5, MovementType::Normal, CollideType::NoEntity));
    }

    #[test]
    fn line_of_sight_blocked_by_wall() {
        let grid = grid_with_wall();
        assert!(!grid.line_of_sight(1.5, 2.5, 6.5, 2.5));
        // through the gap
        assert!(grid.line_of_sight(1.5, 6.5, 6.5, 6.5));
    }

    #[test]
    fn line_of_movement_ignores_target_entity() {
        let mut grid = CollisionGrid::new(8, 8);
        grid.block(6.5, 2.5, false);
        assert!(grid.line_of_movement(1.5, 2.5, 6.5, 2.5, MovementType::Normal));
        // but an entity in the middle of the line blocks
        grid.block(3.5, 2.5, false);
        assert!(!grid.line_of_movement(1.5, 2.5, 6.5, 2.5, MovementType::Normal));
    }

    #[test]
    fn move_slides_along_unblocked_axis() {
        let grid = grid_with_wall();
        let mut x = 3.5;
        let mut y = 2.5;
        // try to move diagonally into the wall: x blocked, y open
        let full = grid.try_move(
            &mut x,
            &mut y,
            1.0,
            1.0,
            MovementType::Normal,
            CollideType::Normal,
        );
        assert!(!full);
        assert!(y > 2.5);
        assert!(x < 4.0);
    }

    #[test]
    fn successful_move_lands_on_valid_position() {
        let grid = grid_with_wall();
        let mut x = 1.5;
        let mut y = 1.5;
        let full = grid.try_move(
            &mut x,
            &mut y,
            0.7,
            0.3,
            MovementType::Normal,
            CollideType::Normal,
        );
        assert!(full);
        assert!((x - 2.2).abs() < 1e-5 && (y - 1.8).abs() < 1e-5);
        assert!(grid.is_valid_position(x, y, MovementType::Normal, CollideType::Normal));
    }

    #[test]
    fn random_neighbor_falls_back_to_center() {
        let mut grid = CollisionGrid::new(3, 3);
        for y in 0..3 {
            for x in 0..3 {
                grid.set_cell(x, y, TileCollision::WallAll);
            }
        }
        let mut rng = GameRng::new(1);
        let p = grid.get_random_neighbor(
            Point::new(1, 1),
            1,
            MovementType::Normal,
            CollideType::Normal,
            &mut rng,
        );
        assert_eq!((p.x, p.y), (1.5, 1.5));
    }

    #[test]
    fn facing_wedge() {
        let grid = CollisionGrid::new(8, 8);
        // direction 5 faces east
        assert!(grid.is_facing(2.5, 2.5, 5, 5.5, 2.5));
        assert!(!grid.is_facing(2.5, 2.5, 5, 2.5, 5.5));
        assert!(!grid.is_facing(2.5, 2.5, 1, 5.5, 2.5));
    }
}
