//! Proxies for the engine's external collaborators: the asset loader
//! (animation sets, sound samples), the audio mixer, abstract input, and
//! the renderable records handed to the renderer each frame.
//!
//! The simulation never touches files, devices, or pixels through
//! anything but these surfaces; a headless run wires in the null mixer
//! and an empty input map and behaves identically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use emberfall_core::file_parser::FileParser;
use emberfall_core::geometry::{FPoint, Point, Rect};
use emberfall_core::parse;

pub type SoundId = usize;
pub type ImageId = usize;

pub const SOUND_NONE: SoundId = 0;

/// How an animation cycles through its frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationType {
    PlayOnce,
    Looped,
    BackForth,
}

/// Which subframes trigger state side effects (damage, footsteps).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActiveFrames {
    All,
    List(Vec<u16>),
}

/// A named animation inside a set, as authored.
#[derive(Clone, Debug)]
pub struct AnimationDef {
    pub name: String,
    pub kind: AnimationType,
    pub frames: u16,
    pub duration: u16,
    pub position: u16,
    pub active_frames: ActiveFrames,
    pub max_kinds: u16,
    pub image: ImageId,
    pub render_size: Point,
    pub render_offset: Point,
}

impl AnimationDef {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AnimationType::Looped,
            frames: 1,
            duration: 1,
            position: 0,
            active_frames: ActiveFrames::All,
            max_kinds: 8,
            image: 0,
            render_size: Point::new(0, 0),
            render_offset: Point::new(0, 0),
        }
    }
}

/// A loaded animation file: one set of named animations sharing a sprite
/// sheet. Referenced by index from entities, powers, and effects.
#[derive(Clone, Debug)]
pub struct AnimationSet {
    pub path: String,
    pub animations: Vec<AnimationDef>,
}

impl AnimationSet {
    pub fn get(&self, name: &str) -> Option<&AnimationDef> {
        self.animations.iter().find(|a| a.name == name)
    }

    /// The first animation acts as the default when no name is given.
    pub fn default_animation(&self) -> Option<&AnimationDef> {
        self.animations.first()
    }
}

/// Cache of animation sets keyed by file path, with reference counts so
/// the presentation layer knows when sprite sheets can be evicted.
#[derive(Default)]
pub struct AnimationLibrary {
    data_dir: PathBuf,
    sets: Vec<AnimationSet>,
    by_path: HashMap<String, usize>,
    counts: HashMap<String, u32>,
    next_image: ImageId,
}

impl AnimationLibrary {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            sets: Vec::new(),
            by_path: HashMap::new(),
            counts: HashMap::new(),
            next_image: 1,
        }
    }

    pub fn get_set(&self, index: usize) -> Option<&AnimationSet> {
        self.sets.get(index)
    }

    /// Load (or fetch from cache) the animation set at `path`, relative to
    /// the data directory. Returns None when the file cannot be read.
    pub fn load_set(&mut self, path: &str) -> Option<usize> {
        if let Some(&idx) = self.by_path.get(path) {
            return Some(idx);
        }

        let full = self.data_dir.join(path);
        let mut infile = match FileParser::open(&full) {
            Ok(f) => f,
            Err(e) => {
                log::error!("AnimationLibrary: {:#}", e);
                return None;
            }
        };

        let image = self.next_image;
        self.next_image += 1;

        let mut set = AnimationSet {
            path: path.to_string(),
            animations: Vec::new(),
        };
        let mut render_size = Point::new(0, 0);
        let mut render_offset = Point::new(0, 0);

        while infile.next() {
            if infile.new_section && infile.section != "header" {
                let mut def = AnimationDef::new(&infile.section);
                def.image = image;
                def.render_size = render_size;
                def.render_offset = render_offset;
                set.animations.push(def);
            }

            if infile.section == "header" {
                match infile.key.as_str() {
                    "image" => {}
                    "render_size" => {
                        let mut val = infile.val.clone();
                        render_size.x = parse::pop_first_int(&mut val);
                        render_size.y = parse::pop_first_int(&mut val);
                    }
                    "render_offset" => {
                        let mut val = infile.val.clone();
                        render_offset.x = parse::pop_first_int(&mut val);
                        render_offset.y = parse::pop_first_int(&mut val);
                    }
                    _ => infile.error("AnimationLibrary: unknown header key"),
                }
                continue;
            }

            let Some(def) = set.animations.last_mut() else {
                infile.error("AnimationLibrary: key before any animation section");
                continue;
            };
            match infile.key.as_str() {
                "position" => def.position = parse::to_int(&infile.val, 0).max(0) as u16,
                "frames" => def.frames = parse::to_int(&infile.val, 1).max(1) as u16,
                "duration" => def.duration = parse::to_int(&infile.val, 1).max(1) as u16,
                "type" => {
                    def.kind = match infile.val.as_str() {
                        "play_once" => AnimationType::PlayOnce,
                        "back_forth" => AnimationType::BackForth,
                        "looped" => AnimationType::Looped,
                        _ => {
                            infile.error("AnimationLibrary: unknown animation type");
                            AnimationType::Looped
                        }
                    }
                }
                "active_frame" => {
                    if infile.val == "all" {
                        def.active_frames = ActiveFrames::All;
                    } else {
                        let mut val = infile.val.clone();
                        let mut list = Vec::new();
                        while !val.is_empty() {
                            list.push(parse::pop_first_int(&mut val).max(0) as u16);
                        }
                        def.active_frames = ActiveFrames::List(list);
                    }
                }
                "max_kinds" => def.max_kinds = parse::to_int(&infile.val, 8).max(1) as u16,
                _ => infile.error("AnimationLibrary: unknown key"),
            }
        }

        let idx = self.sets.len();
        self.sets.push(set);
        self.by_path.insert(path.to_string(), idx);
        Some(idx)
    }

    /// Register an in-memory set. Used by tests.
    pub fn insert_set(&mut self, set: AnimationSet) -> usize {
        let idx = self.sets.len();
        self.by_path.insert(set.path.clone(), idx);
        self.sets.push(set);
        idx
    }

    pub fn increase_count(&mut self, path: &str) {
        *self.counts.entry(path.to_string()).or_insert(0) += 1;
    }

    pub fn decrease_count(&mut self, path: &str) {
        if let Some(c) = self.counts.get_mut(path) {
            *c = c.saturating_sub(1);
        }
    }

    pub fn count(&self, path: &str) -> u32 {
        self.counts.get(path).copied().unwrap_or(0)
    }
}

/// Sound samples by path, producing opaque ids the mixer understands.
#[derive(Default)]
pub struct SoundCatalog {
    by_path: HashMap<String, SoundId>,
    counts: Vec<u32>,
}

impl SoundCatalog {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            // id 0 is reserved for "no sound"
            counts: vec![0],
        }
    }

    pub fn load(&mut self, path: &str) -> SoundId {
        if path.is_empty() {
            return SOUND_NONE;
        }
        if let Some(&id) = self.by_path.get(path) {
            self.counts[id] += 1;
            return id;
        }
        let id = self.counts.len();
        self.by_path.insert(path.to_string(), id);
        self.counts.push(1);
        id
    }

    pub fn unload(&mut self, id: SoundId) {
        if id != SOUND_NONE && id < self.counts.len() {
            self.counts[id] = self.counts[id].saturating_sub(1);
        }
    }
}

/// The audio backend the session plays through. Channels group sounds so
/// repeated hits on one channel replace one another.
pub trait AudioMixer {
    fn play(&mut self, id: SoundId, channel: &str, pos: Option<FPoint>, looped: bool);
}

/// Mixer for headless runs and tests: remembers what was asked of it.
#[derive(Default)]
pub struct NullMixer {
    pub played: Vec<(SoundId, String)>,
}

impl AudioMixer for NullMixer {
    fn play(&mut self, id: SoundId, channel: &str, _pos: Option<FPoint>, _looped: bool) {
        if id != SOUND_NONE {
            self.played.push((id, channel.to_string()));
        }
    }
}

/// Abstract input actions, as supplied by the host each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Main1,
    Main2,
    Up,
    Down,
    Left,
    Right,
    AimUp,
    AimDown,
    AimLeft,
    AimRight,
    Accept,
    Shift,
    Alt,
}

pub const ACTION_COUNT: usize = 13;

#[derive(Clone, Debug, Default)]
pub struct InputState {
    pressing: [bool; ACTION_COUNT],
    lock: [bool; ACTION_COUNT],
    pub mouse: Point,
    /// True while the host considers the mouse aimed at the game world
    /// (not a menu), so MAIN1 may move/attack.
    pub mouse_in_world: bool,
}

impl InputState {
    pub fn pressing(&self, action: Action) -> bool {
        self.pressing[action as usize]
    }

    pub fn set_pressing(&mut self, action: Action, value: bool) {
        self.pressing[action as usize] = value;
        if !value {
            self.lock[action as usize] = false;
        }
    }

    /// Pressed and not consumed this press.
    pub fn pressed_unlocked(&self, action: Action) -> bool {
        self.pressing[action as usize] && !self.lock[action as usize]
    }

    /// Consume the current press; stays consumed until release.
    pub fn lock(&mut self, action: Action) {
        self.lock[action as usize] = true;
    }
}

/// One draw request. `map_pos` is in map units; the session sorts the
/// final list in screen Z before handing it out.
#[derive(Clone, Debug)]
pub struct Renderable {
    pub image: ImageId,
    pub src: Rect,
    pub offset: Point,
    pub map_pos: FPoint,
    /// 0 = on the floor (under objects), 1 = corpses, 2 = standard.
    pub prio: i32,
    pub color_mod: (u8, u8, u8),
    pub alpha_mod: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_catalog_interns_paths() {
        let mut cat = SoundCatalog::new();
        let a = cat.load("soundfx/hit.ogg");
        let b = cat.load("soundfx/hit.ogg");
        assert_eq!(a, b);
        assert_ne!(a, SOUND_NONE);
        assert_eq!(cat.load(""), SOUND_NONE);
    }

    #[test]
    fn input_lock_consumes_press() {
        let mut input = InputState::default();
        input.set_pressing(Action::Main1, true);
        assert!(input.pressed_unlocked(Action::Main1));
        input.lock(Action::Main1);
        assert!(!input.pressed_unlocked(Action::Main1));
        // release clears the lock
        input.set_pressing(Action::Main1, false);
        input.set_pressing(Action::Main1, true);
        assert!(input.pressed_unlocked(Action::Main1));
    }

    #[test]
    fn animation_set_parses_sections() {
        let mut infile = FileParser::from_string(
            "[header]\nrender_size=64,64\nrender_offset=16,16\n\
             [stance]\nframes=4\nduration=12\ntype=looped\n\
             [swing]\nframes=4\nduration=8\ntype=play_once\nactive_frame=2\n",
        );
        // reuse the library parser through a temp file-free path: build by hand
        let mut set = AnimationSet {
            path: "test".into(),
            animations: Vec::new(),
        };
        let mut render_size = Point::new(0, 0);
        while infile.next() {
            if infile.new_section && infile.section != "header" {
                let mut def = AnimationDef::new(&infile.section);
                def.render_size = render_size;
                set.animations.push(def);
            }
            if infile.section == "header" {
                if infile.key == "render_size" {
                    let mut val = infile.val.clone();
                    render_size.x = parse::pop_first_int(&mut val);
                    render_size.y = parse::pop_first_int(&mut val);
                }
                continue;
            }
            let def = set.animations.last_mut().unwrap();
            match infile.key.as_str() {
                "frames" => def.frames = parse::to_int(&infile.val, 1) as u16,
                "duration" => def.duration = parse::to_int(&infile.val, 1) as u16,
                "type" => {
                    def.kind = if infile.val == "play_once" {
                        AnimationType::PlayOnce
                    } else {
                        AnimationType::Looped
                    }
                }
                "active_frame" => def.active_frames = ActiveFrames::List(vec![2]),
                _ => {}
            }
        }
        assert_eq!(set.animations.len(), 2);
        assert_eq!(set.get("swing").unwrap().kind, AnimationType::PlayOnce);
        assert_eq!(set.default_animation().unwrap().name, "stance");
    }
}
