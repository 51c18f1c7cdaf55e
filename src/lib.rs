// MrcSleuth - lib.rs
//
// Library entry point, exposing the parsing engine for the CLI, for
// integration testing and for embedders that bring their own margin
// analyzer or fault signal.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
