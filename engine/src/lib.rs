//! Emberfall's combat simulation core: a deterministic, single-threaded
//! tick simulation of a tiled world — entities with stat blocks and
//! status effects, powers that emit hazards, a shared collision grid
//! with an A* pathfinder, loot, map events, and a camera — behind
//! narrow proxies for assets, audio, input, and rendering.
//!
//! [`session::GameSession`] owns everything; one call to its `logic()`
//! is one tick at the configured frame rate.

pub mod animation;
pub mod assets;
pub mod avatar;
pub mod behavior;
pub mod camera;
pub mod campaign;
pub mod collision;
pub mod combat;
pub mod effects;
pub mod entity;
pub mod entity_manager;
pub mod events;
pub mod hazards;
pub mod ids;
pub mod items;
pub mod loot;
pub mod map;
pub mod path_finding;
pub mod powers;
pub mod save;
pub mod session;
pub mod stat_block;
