// MrcSleuth - app/mod.rs
//
// Application layer: session orchestration, line sources, fault signalling
// and report sinks.
// Dependencies: core, platform, util.

pub mod output;
pub mod session;
pub mod signal;
pub mod source;
