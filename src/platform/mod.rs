// MrcSleuth - platform/mod.rs
//
// Platform abstraction layer: config file location and loading, console
// source probing.
// Dependencies: standard library, directories crate, core model types.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
