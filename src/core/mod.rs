// MrcSleuth - core/mod.rs
//
// Core engine layer: segmentation, extraction, storage, goal resolution.
// Dependencies: regex, serde, chrono, csv/serde_json for export.
// Must NOT depend on: app, platform, or open files directly.

pub mod collab;
pub mod export;
pub mod extract;
pub mod markers;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod segmenter;
pub mod store;
pub mod verdict;
