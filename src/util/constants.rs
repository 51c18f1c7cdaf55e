// MrcSleuth - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every growing collection in the engine is bounded by one of these.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "MrcSleuth";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "MrcSleuth";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Test name recorded in reports when none is given on the command line.
pub const DEFAULT_TEST_NAME: &str = "signal_integrity";

// =============================================================================
// Segmentation limits
// =============================================================================

/// Maximum number of body lines buffered for a single open block.
///
/// MRC tables are a few hundred lines at most; a block that never sees its
/// end marker on a chatty live console would otherwise grow without bound.
/// Lines past the cap are dropped and one diagnostic is recorded.
pub const DEFAULT_MAX_BLOCK_BODY_LINES: usize = 20_000;

/// Hard upper bound on the configurable block body cap.
pub const ABSOLUTE_MAX_BLOCK_BODY_LINES: usize = 1_000_000;

/// Maximum depth of the open-block stack. Start markers beyond this depth
/// are ignored with a diagnostic.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 16;

/// Hard upper bound on the configurable nesting depth.
pub const ABSOLUTE_MAX_NESTING_DEPTH: usize = 256;

/// Maximum number of soft diagnostics retained per session.
pub const MAX_DIAGNOSTICS: usize = 1_000;

/// Maximum number of fault events retained per session.
pub const MAX_FAULT_EVENTS: usize = 10_000;

// =============================================================================
// Resolver limits
// =============================================================================

/// Number of resolver rounds attempted by the end-of-stream flush pass
/// before the remaining goals are reported as unresolved.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 10;

/// Hard upper bound on the configurable flush round cap.
pub const ABSOLUTE_MAX_FLUSH_ROUNDS: usize = 1_000;

// =============================================================================
// Live source
// =============================================================================

/// Initial sleep between polls of a live console that has no data (ms).
pub const LIVE_POLL_INTERVAL_MS: u64 = 300;

/// Upper bound of the poll backoff for an idle live console (ms).
pub const LIVE_POLL_MAX_INTERVAL_MS: u64 = 2_400;

/// Slice of an idle sleep after which the cancel flag is re-checked (ms).
pub const LIVE_CANCEL_CHECK_INTERVAL_MS: u64 = 50;

// =============================================================================
// Node configuration defaults
// =============================================================================

/// Expected populated sockets.
pub const DEFAULT_SOCKETS_COUNT: usize = 2;

/// Expected populated channels on every socket.
pub const DEFAULT_CHANNELS_COUNT: usize = 6;

/// Expected installed DIMMs across the whole node.
pub const DEFAULT_DIMMS_COUNT: usize = 24;

/// DIMM slots per channel.
pub const DEFAULT_DIMM_PER_CHANNEL: usize = 2;

/// Plan-of-record memory frequency (MT/s).
pub const DEFAULT_POR_RAM_FREQ: u32 = 2666;

/// Upper bound for any node configuration count (prevents typos like 2400).
pub const ABSOLUTE_MAX_NODE_COUNT: usize = 1_024;

/// Accepted range of the plan-of-record memory frequency (MT/s).
pub const MIN_POR_RAM_FREQ: u32 = 800;
pub const MAX_POR_RAM_FREQ: u32 = 12_800;

// =============================================================================
// Fault signalling (PCA9685 LED board)
// =============================================================================

/// I2C bus the LED controller sits on.
pub const DEFAULT_LED_I2C_BUS: u8 = 8;

/// I2C address of the LED controller: 0b1[A5][A4][A3][A2][A1][A0].
pub const DEFAULT_LED_I2C_ADDRESS: u8 = 0b100_0000;

/// PWM frequency used for the LEDs (Hz).
pub const DEFAULT_LED_PWM_FREQUENCY_HZ: u32 = 600;

/// PWM frequency range supported by the PCA9685 prescaler (Hz).
pub const MIN_LED_PWM_FREQUENCY_HZ: u32 = 24;
pub const MAX_LED_PWM_FREQUENCY_HZ: u32 = 1_526;

/// PCA9685 I2C addresses all have the top address bit set.
pub const MIN_LED_I2C_ADDRESS: u8 = 0b100_0000;
pub const MAX_LED_I2C_ADDRESS: u8 = 0b111_1111;

/// Number of PWM channels on the LED controller.
pub const LED_CHANNEL_COUNT: u8 = 16;

/// Duty cycle (percent) for a critical fault.
pub const LED_DUTY_CRITICAL: u8 = 100;

/// Duty cycle (percent) for a warning.
pub const LED_DUTY_WARNING: u8 = 20;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a console line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "mrcsleuth.toml";
