// MrcSleuth - platform/config.rs
//
// Platform configuration directory resolution and mrcsleuth.toml loading
// with startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::model::NodeConfig;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Resolved platform paths for MrcSleuth configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/mrcsleuth/ or %APPDATA%\MrcSleuth\config\)
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }

    /// Config file used when `--config` is not given.
    pub fn default_config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// mrcsleuth.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of mrcsleuth.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[node_configuration]` section.
    pub node_configuration: NodeSection,
    /// `[parsing]` section.
    pub parsing: ParsingSection,
    /// `[leds]` section.
    pub leds: LedsSection,
    /// `[logging]` section.
    pub logging: LoggingSection,
}

/// `[node_configuration]` config section: the expected memory population.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub sockets_count: Option<usize>,
    /// Channels on each socket.
    pub channels_count: Option<usize>,
    /// DIMMs across the whole node.
    pub dimms_count: Option<usize>,
    pub dimm_per_channel: Option<usize>,
    /// MT/s.
    pub por_ram_freq: Option<u32>,
}

/// `[parsing]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ParsingSection {
    /// Lines buffered per open block.
    pub max_block_lines: Option<usize>,
    /// Resolver rounds in the end-of-stream flush.
    pub max_flush_rounds: Option<usize>,
    /// Depth of the open-block stack.
    pub max_nesting_depth: Option<usize>,
}

/// `[leds]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LedsSection {
    pub enabled: Option<bool>,
    pub i2c_bus: Option<u8>,
    pub address: Option<u8>,
    pub pwm_frequency_hz: Option<u32>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// LED board settings from the `[leds]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedConfig {
    pub enabled: bool,
    pub i2c_bus: u8,
    pub address: u8,
    pub pwm_frequency_hz: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            i2c_bus: constants::DEFAULT_LED_I2C_BUS,
            address: constants::DEFAULT_LED_I2C_ADDRESS,
            pwm_frequency_hz: constants::DEFAULT_LED_PWM_FREQUENCY_HZ,
        }
    }
}

/// Validated application configuration.
///
/// All values are validated against named constants at load time.
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub node: NodeConfig,

    // -- Parsing --
    pub max_block_lines: usize,
    pub max_flush_rounds: usize,
    pub max_nesting_depth: usize,

    pub leds: LedConfig,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            max_block_lines: constants::DEFAULT_MAX_BLOCK_BODY_LINES,
            max_flush_rounds: constants::DEFAULT_MAX_FLUSH_ROUNDS,
            max_nesting_depth: constants::DEFAULT_MAX_NESTING_DEPTH,
            leds: LedConfig::default(),
            log_level: None,
            log_file: None,
        }
    }
}

/// Accept `value` if it lies in `range`, otherwise record a warning and keep
/// the default already in `slot`.
fn validate<T>(
    field: &str,
    value: Option<T>,
    range: RangeInclusive<T>,
    slot: &mut T,
    warnings: &mut Vec<String>,
) where
    T: PartialOrd + Display + Copy,
{
    let Some(v) = value else { return };
    if range.contains(&v) {
        *slot = v;
    } else {
        let err = ConfigError::ValueOutOfRange {
            field: field.to_string(),
            value: v.to_string(),
            expected: format!("{}-{}", range.start(), range.end()),
        };
        warnings.push(format!("{err}. Using default ({slot})."));
    }
}

/// Load and validate the config file at `config_path`.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// If the file does not exist, returns defaults with no warnings (first run).
/// If the file is unreadable or unparseable, returns defaults with a warning;
/// the run still goes ahead.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(e) => {
            let err = ConfigError::Io {
                path: config_path.to_path_buf(),
                source: e,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let raw: RawConfig = match toml::from_str(&content) {
        Ok(r) => r,
        Err(e) => {
            let err = ConfigError::TomlParse {
                path: config_path.to_path_buf(),
                source: e,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %config_path.display(), "Loaded config file");
    let config = validate_raw(raw, &mut warnings);

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

/// Validate every field of a parsed config, accumulating all warnings.
pub fn validate_raw(raw: RawConfig, warnings: &mut Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();
    let max_count = constants::ABSOLUTE_MAX_NODE_COUNT;

    // -- Node configuration --
    let n = &raw.node_configuration;
    validate(
        "node_configuration.sockets_count",
        n.sockets_count,
        1..=max_count,
        &mut config.node.sockets_count,
        warnings,
    );
    validate(
        "node_configuration.channels_count",
        n.channels_count,
        1..=max_count,
        &mut config.node.channels_count,
        warnings,
    );
    validate(
        "node_configuration.dimms_count",
        n.dimms_count,
        1..=max_count,
        &mut config.node.dimms_count,
        warnings,
    );
    validate(
        "node_configuration.dimm_per_channel",
        n.dimm_per_channel,
        1..=max_count,
        &mut config.node.dimm_per_channel,
        warnings,
    );
    validate(
        "node_configuration.por_ram_freq",
        n.por_ram_freq,
        constants::MIN_POR_RAM_FREQ..=constants::MAX_POR_RAM_FREQ,
        &mut config.node.por_ram_freq,
        warnings,
    );

    let slots = config.node.sockets_count * config.node.channels_count * config.node.dimm_per_channel;
    if config.node.dimms_count > slots {
        warnings.push(format!(
            "[node_configuration] dimms_count = {} exceeds the {slots} slots of \
             {} sockets x {} channels x {} DIMMs per channel. The completeness check will fail.",
            config.node.dimms_count,
            config.node.sockets_count,
            config.node.channels_count,
            config.node.dimm_per_channel,
        ));
    }

    // -- Parsing --
    validate(
        "parsing.max_block_lines",
        raw.parsing.max_block_lines,
        1..=constants::ABSOLUTE_MAX_BLOCK_BODY_LINES,
        &mut config.max_block_lines,
        warnings,
    );
    validate(
        "parsing.max_flush_rounds",
        raw.parsing.max_flush_rounds,
        1..=constants::ABSOLUTE_MAX_FLUSH_ROUNDS,
        &mut config.max_flush_rounds,
        warnings,
    );
    validate(
        "parsing.max_nesting_depth",
        raw.parsing.max_nesting_depth,
        1..=constants::ABSOLUTE_MAX_NESTING_DEPTH,
        &mut config.max_nesting_depth,
        warnings,
    );

    // -- LEDs --
    if let Some(enabled) = raw.leds.enabled {
        config.leds.enabled = enabled;
    }
    if let Some(bus) = raw.leds.i2c_bus {
        config.leds.i2c_bus = bus;
    }
    validate(
        "leds.address",
        raw.leds.address,
        constants::MIN_LED_I2C_ADDRESS..=constants::MAX_LED_I2C_ADDRESS,
        &mut config.leds.address,
        warnings,
    );
    validate(
        "leds.pwm_frequency_hz",
        raw.leds.pwm_frequency_hz,
        constants::MIN_LED_PWM_FREQUENCY_HZ..=constants::MAX_LED_PWM_FREQUENCY_HZ,
        &mut config.leds.pwm_frequency_hz,
        warnings,
    );

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.clone());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    // -- Logging: file --
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    config
}
