//! Per-instance animation playback. An [`Animation`] is stamped out from
//! an [`AnimationDef`] and advanced once per tick; state machines key
//! their side effects off the frame predicates below.

use emberfall_core::geometry::{FPoint, Rect};

use crate::assets::{ActiveFrames, AnimationDef, AnimationType, Renderable};

#[derive(Clone, Debug)]
pub struct Animation {
    name: String,
    kind: AnimationType,
    /// Subframe-to-frame mapping, one entry per tick of the duration.
    frames: Vec<u16>,
    number_frames: u16,
    cur_frame: u16,
    cur_frame_index: u16,
    cur_frame_index_f: f32,
    /// Playback direction for back-forth animations: 1 forward, -1 back.
    back_forth_dir: i8,
    times_played: u32,
    active_frames: ActiveFrames,
    speed: f32,

    // render info copied from the definition
    image: usize,
    position: u16,
    max_kinds: u16,
    render_size: emberfall_core::geometry::Point,
    render_offset: emberfall_core::geometry::Point,
}

impl Animation {
    pub fn new(def: &AnimationDef) -> Self {
        let mut anim = Self {
            name: def.name.clone(),
            kind: def.kind,
            frames: Vec::new(),
            number_frames: 0,
            cur_frame: 0,
            cur_frame_index: 0,
            cur_frame_index_f: 0.0,
            back_forth_dir: 1,
            times_played: 0,
            active_frames: def.active_frames.clone(),
            speed: 1.0,
            image: def.image,
            position: def.position,
            max_kinds: def.max_kinds,
            render_size: def.render_size,
            render_offset: def.render_offset,
        };
        anim.setup(def.frames, def.duration);
        anim
    }

    /// Lay `frames` out over `duration` ticks. When the duration divides
    /// evenly each frame gets the same share; otherwise Bresenham's line
    /// algorithm spreads them so the index mapping stays non-decreasing.
    fn setup(&mut self, frames: u16, duration: u16) {
        let frames = frames.max(1);
        let duration = duration.max(1);
        self.frames.clear();

        if duration % frames == 0 {
            let divided = duration / frames;
            for i in 0..frames {
                for _ in 0..divided {
                    self.frames.push(i);
                }
            }
        } else {
            let x1 = duration as i32 - 1;
            let y1 = frames as i32 - 1;
            let dx = x1;
            let dy = y1;
            let mut d = 2 * dy - dx;
            let mut y: u16 = 0;

            self.frames.push(0);
            let mut x = 1;
            while x <= x1 {
                if d > 0 {
                    y += 1;
                    self.frames.push(y);
                    d += 2 * dy - 2 * dx;
                } else {
                    self.frames.push(y);
                    d += 2 * dy;
                }
                x += 1;
            }
        }

        self.number_frames = self.frames.last().map(|f| f + 1).unwrap_or(0);
        if self.kind == AnimationType::BackForth {
            self.number_frames *= 2;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_speed(&mut self, percent: f32) {
        self.speed = (percent / 100.0).max(0.0);
    }

    pub fn advance_frame(&mut self) {
        if self.frames.is_empty() {
            self.times_played += 1;
            return;
        }

        let last = (self.frames.len() - 1) as u16;
        match self.kind {
            AnimationType::PlayOnce => {
                if self.cur_frame_index < last {
                    self.cur_frame_index_f += self.speed;
                    self.cur_frame_index = self.cur_frame_index_f as u16;
                } else {
                    self.times_played = 1;
                }
            }
            AnimationType::Looped => {
                if self.cur_frame_index < last {
                    self.cur_frame_index_f += self.speed;
                    self.cur_frame_index = self.cur_frame_index_f as u16;
                } else {
                    self.cur_frame_index = 0;
                    self.cur_frame_index_f = 0.0;
                    self.times_played += 1;
                }
            }
            AnimationType::BackForth => {
                if self.back_forth_dir == 1 {
                    if self.cur_frame_index < last {
                        self.cur_frame_index_f += self.speed;
                        self.cur_frame_index = self.cur_frame_index_f as u16;
                    } else {
                        self.back_forth_dir = -1;
                    }
                } else if self.cur_frame_index > 0 {
                    self.cur_frame_index_f -= self.speed;
                    self.cur_frame_index = self.cur_frame_index_f as u16;
                } else {
                    self.back_forth_dir = 1;
                    self.times_played += 1;
                }
            }
        }

        self.cur_frame_index = self.cur_frame_index.min(last);
        self.cur_frame = self.frames[self.cur_frame_index as usize];
    }

    pub fn reset(&mut self) {
        self.cur_frame = 0;
        self.cur_frame_index = 0;
        self.cur_frame_index_f = 0.0;
        self.back_forth_dir = 1;
        self.times_played = 0;
    }

    /// Copy playback position from another instance (layer sync).
    pub fn sync_to(&mut self, other: &Animation) {
        self.cur_frame = other.cur_frame;
        self.cur_frame_index = other.cur_frame_index;
        self.cur_frame_index_f = other.cur_frame_index_f;
        self.times_played = other.times_played;
        self.back_forth_dir = other.back_forth_dir;
        if self.cur_frame_index as usize >= self.frames.len() {
            self.cur_frame_index = (self.frames.len().max(1) - 1) as u16;
            self.cur_frame_index_f = self.cur_frame_index as f32;
        }
    }

    pub fn cur_frame(&self) -> u16 {
        self.cur_frame
    }

    pub fn times_played(&self) -> u32 {
        self.times_played
    }

    pub fn is_first_frame(&self) -> bool {
        self.cur_frame_index == 0
    }

    pub fn is_last_frame(&self) -> bool {
        self.cur_frame_index as usize + 1 == self.frames.len().max(1)
    }

    pub fn is_second_last_frame(&self) -> bool {
        let len = self.frames.len().max(1);
        len >= 2 && self.cur_frame_index as usize + 2 == len
    }

    /// True on the frames where state side effects fire.
    pub fn is_active_frame(&self) -> bool {
        match &self.active_frames {
            ActiveFrames::All => true,
            ActiveFrames::List(list) => list.contains(&self.cur_frame),
        }
    }

    /// Play-once animations are completed after their single pass.
    pub fn is_completed(&self) -> bool {
        self.kind == AnimationType::PlayOnce && self.times_played > 0
    }

    /// Build the draw record for the current frame of the given kind
    /// (direction row or visual option).
    pub fn current_frame_renderable(&self, kind: u16, map_pos: FPoint, prio: i32) -> Renderable {
        let kind = kind.min(self.max_kinds.saturating_sub(1));
        Renderable {
            image: self.image,
            src: Rect::new(
                self.render_size.x * (self.position + self.cur_frame) as i32,
                self.render_size.y * kind as i32,
                self.render_size.x,
                self.render_size.y,
            ),
            offset: self.render_offset,
            map_pos,
            prio,
            color_mod: (255, 255, 255),
            alpha_mod: 255,
        }
    }

    #[cfg(test)]
    pub(crate) fn subframes(&self) -> &[u16] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AnimationDef;
    use emberfall_core::geometry::Point;

    fn def(frames: u16, duration: u16, kind: AnimationType) -> AnimationDef {
        AnimationDef {
            name: "test".into(),
            kind,
            frames,
            duration,
            position: 0,
            active_frames: ActiveFrames::All,
            max_kinds: 8,
            image: 1,
            render_size: Point::new(32, 32),
            render_offset: Point::new(16, 16),
        }
    }

    #[test]
    fn subframe_ticks_sum_to_duration() {
        for (frames, duration) in [(4u16, 12u16), (4, 10), (3, 7), (5, 5), (1, 9)] {
            let anim = Animation::new(&def(frames, duration, AnimationType::Looped));
            assert_eq!(anim.subframes().len(), duration as usize);
            // mapping is non-decreasing
            let sub = anim.subframes();
            for w in sub.windows(2) {
                assert!(w[1] >= w[0]);
            }
            assert_eq!(*sub.last().unwrap() as u16 + 1, frames);
        }
    }

    #[test]
    fn looped_animation_wraps_and_counts_plays() {
        let mut anim = Animation::new(&def(2, 4, AnimationType::Looped));
        for _ in 0..4 {
            anim.advance_frame();
        }
        assert_eq!(anim.times_played(), 1);
        assert!(anim.is_first_frame());
    }

    #[test]
    fn play_once_sticks_at_last_frame() {
        let mut anim = Animation::new(&def(3, 3, AnimationType::PlayOnce));
        for _ in 0..10 {
            anim.advance_frame();
        }
        assert!(anim.is_last_frame());
        assert!(anim.is_completed());
        assert_eq!(anim.cur_frame(), 2);
    }

    #[test]
    fn active_frame_list_gates_side_effects() {
        let mut d = def(4, 4, AnimationType::PlayOnce);
        d.active_frames = ActiveFrames::List(vec![2]);
        let mut anim = Animation::new(&d);
        let mut active_count = 0;
        for _ in 0..4 {
            if anim.is_active_frame() {
                active_count += 1;
            }
            anim.advance_frame();
        }
        assert_eq!(active_count, 1);
    }

    #[test]
    fn speed_scaling_skips_subframes() {
        let mut anim = Animation::new(&def(4, 8, AnimationType::PlayOnce));
        anim.set_speed(200.0);
        let mut ticks = 0;
        while !anim.is_last_frame() {
            anim.advance_frame();
            ticks += 1;
            assert!(ticks < 20);
        }
        // double speed finishes in roughly half the duration
        assert!(ticks <= 4);
    }
}
