//! blockmap - browsable tile maps from voxel-world saves
//!
//! This library walks a persisted voxel world (chunks grouped into region
//! files), composes per-block sprites into image tiles under one of several
//! projections, and emits a quad-tree of tiles suitable for a static web
//! viewer. Renders are incremental: only tiles touched by chunks that changed
//! since the last run are reproduced.

pub mod blockstate;
pub mod config;
pub mod coord;
pub mod dispatch;
pub mod image;
pub mod manager;
pub mod region;
pub mod render;
pub mod sprite;
pub mod tile;
pub mod webmeta;
pub mod world;
